//! Scripted trust store provider for unit tests.

use std::cell::{Cell, RefCell};

use crate::provider::{fill_buffer, DecryptMessageParams, NativeError, PropertyId, TrustStoreProvider};
use crate::store::StoreLocation;

/// Result of `open_store`.
#[derive(Debug, Clone, Copy)]
pub(crate) enum OpenBehavior {
    Open,
    NullHandle,
    Fail(NativeError),
}

/// Result of `decrypt_message`.
#[derive(Debug, Clone)]
pub(crate) enum DecryptBehavior {
    /// Report `estimate` in phase one, then produce `plaintext`.
    Plaintext { estimate: u32, plaintext: Vec<u8> },
    /// Fail phase one.
    FailSize(NativeError),
    /// Succeed phase one with `estimate`, fail phase two.
    FailFill { estimate: u32, error: NativeError },
}

/// Which certificate `decrypt_message` reports as having decrypted.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Exchange {
    /// The last certificate added.
    Last,
    /// The certificate at this index.
    Index(usize),
    /// None.
    Unreported,
}

#[derive(Debug)]
pub(crate) struct FakeStore {
    pub(crate) id: u32,
}

pub(crate) struct FakeProvider {
    open: OpenBehavior,
    thumbprints: Vec<Result<Vec<u8>, NativeError>>,
    enumeration_error: Option<(usize, NativeError)>,
    end_with_error: bool,
    decrypt: DecryptBehavior,
    exchange: Exchange,
    next_store_id: Cell<u32>,
    opened: Cell<usize>,
    closed: Cell<usize>,
    released: RefCell<Vec<usize>>,
    decrypt_store_ids: RefCell<Vec<u32>>,
}

impl FakeProvider {
    pub(crate) fn new() -> Self {
        Self {
            open: OpenBehavior::Open,
            thumbprints: Vec::new(),
            enumeration_error: None,
            end_with_error: false,
            decrypt: DecryptBehavior::Plaintext {
                estimate: 0,
                plaintext: Vec::new(),
            },
            exchange: Exchange::Last,
            next_store_id: Cell::new(1),
            opened: Cell::new(0),
            closed: Cell::new(0),
            released: RefCell::new(Vec::new()),
            decrypt_store_ids: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn with_open(mut self, open: OpenBehavior) -> Self {
        self.open = open;
        self
    }

    /// Add a certificate whose thumbprint property yields `thumbprint`.
    pub(crate) fn with_cert(mut self, thumbprint: &[u8]) -> Self {
        self.thumbprints.push(Ok(thumbprint.to_vec()));
        self
    }

    /// Add a certificate whose thumbprint property query fails.
    pub(crate) fn with_broken_cert(mut self, error: NativeError) -> Self {
        self.thumbprints.push(Err(error));
        self
    }

    /// Fail enumeration when reaching `index`.
    pub(crate) fn with_enumeration_error(mut self, index: usize, error: NativeError) -> Self {
        self.enumeration_error = Some((index, error));
        self
    }

    /// Report end of store as `CRYPT_E_NOT_FOUND` instead of `None`.
    pub(crate) fn ending_with_not_found(mut self) -> Self {
        self.end_with_error = true;
        self
    }

    pub(crate) fn with_decrypt(mut self, decrypt: DecryptBehavior) -> Self {
        self.decrypt = decrypt;
        self
    }

    pub(crate) fn with_exchange(mut self, exchange: Exchange) -> Self {
        self.exchange = exchange;
        self
    }

    pub(crate) fn opened(&self) -> usize {
        self.opened.get()
    }

    pub(crate) fn closed(&self) -> usize {
        self.closed.get()
    }

    /// Indices of certificates released by enumeration or by drop.
    pub(crate) fn released(&self) -> Vec<usize> {
        self.released.borrow().clone()
    }

    /// Store ids passed to `decrypt_message`.
    pub(crate) fn decrypt_store_ids(&self) -> Vec<u32> {
        self.decrypt_store_ids.borrow().clone()
    }
}

impl TrustStoreProvider for FakeProvider {
    type Store = FakeStore;
    type Cert = usize;

    fn open_store(
        &self,
        _location: StoreLocation,
        _name: &str,
    ) -> Result<Option<FakeStore>, NativeError> {
        match self.open {
            OpenBehavior::Open => {
                let id = self.next_store_id.get();
                self.next_store_id.set(id + 1);
                self.opened.set(self.opened.get() + 1);
                Ok(Some(FakeStore { id }))
            }
            OpenBehavior::NullHandle => Ok(None),
            OpenBehavior::Fail(e) => Err(e),
        }
    }

    fn close_store(&self, _store: &mut FakeStore) {
        self.closed.set(self.closed.get() + 1);
    }

    fn next_certificate(
        &self,
        _store: &FakeStore,
        previous: Option<usize>,
    ) -> Result<Option<usize>, NativeError> {
        let next = match previous {
            Some(index) => {
                self.released.borrow_mut().push(index);
                index + 1
            }
            None => 0,
        };

        if let Some((index, error)) = self.enumeration_error {
            if index == next {
                return Err(error);
            }
        }

        if next < self.thumbprints.len() {
            Ok(Some(next))
        } else if self.end_with_error {
            Err(NativeError::CRYPT_E_NOT_FOUND)
        } else {
            Ok(None)
        }
    }

    fn certificate_property(
        &self,
        cert: &usize,
        property: PropertyId,
        buffer: Option<&mut [u8]>,
        len: &mut u32,
    ) -> Result<(), NativeError> {
        assert_eq!(property, PropertyId::Sha1Hash);
        match &self.thumbprints[*cert] {
            Ok(bytes) => fill_buffer(bytes, buffer, len),
            Err(e) => Err(*e),
        }
    }

    fn decrypt_message(
        &self,
        params: &DecryptMessageParams<'_, FakeStore>,
        _message: &[u8],
        buffer: Option<&mut [u8]>,
        len: &mut u32,
    ) -> Result<Option<usize>, NativeError> {
        self.decrypt_store_ids.borrow_mut().push(params.store().id);

        match (&self.decrypt, buffer) {
            (DecryptBehavior::FailSize(e), _) => return Err(*e),
            (DecryptBehavior::Plaintext { estimate, .. }, None)
            | (DecryptBehavior::FailFill { estimate, .. }, None) => *len = *estimate,
            (DecryptBehavior::FailFill { error, .. }, Some(_)) => return Err(*error),
            (DecryptBehavior::Plaintext { plaintext, .. }, Some(out)) => {
                fill_buffer(plaintext, Some(out), len)?
            }
        }

        Ok(match self.exchange {
            Exchange::Last => self.thumbprints.len().checked_sub(1),
            Exchange::Index(index) => Some(index),
            Exchange::Unreported => None,
        })
    }

    fn release_certificate(&self, cert: &mut usize) {
        self.released.borrow_mut().push(*cert);
    }
}

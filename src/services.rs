//! External Collaborator Contracts
//!
//! The orchestrator depends on four narrow call surfaces: the ledger client
//! (authenticated reads and confirmed writes), the encryption service
//! (plaintext in, handle + proof out), the authorization signature cache
//! (time-bounded decryption credentials), and the decryption service
//! (handles + credential in, cleartexts out). Each is a trait seam; the
//! in-memory implementations at the bottom of this module back the test
//! suites and count their calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::deployment::Address;
use crate::error::ServiceError;
use crate::handle::{CiphertextBlob, Handle, HANDLE_LEN};
use crate::question::QUESTION_COUNT;

/// Receipt for a confirmed ledger write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: [u8; 32],
    pub block_number: u64,
}

/// Raw output of an encryption session: one handle per queued value plus a
/// single correctness proof, each in whatever shape the service produced
#[derive(Clone, Debug)]
pub struct EncryptedPayload {
    pub handles: Vec<CiphertextBlob>,
    pub input_proof: CiphertextBlob,
}

/// Time-bounded, signer-issued credential permitting decryption of handles
/// scoped to specific contract addresses
#[derive(Clone, Debug)]
pub struct DecryptionAuthorization {
    pub private_key: String,
    pub public_key: String,
    pub signature: String,
    pub contract_addresses: Vec<Address>,
    pub user_address: Address,
    pub start_timestamp: u64,
    pub duration_days: u64,
}

/// One entry of a batch decryption request
#[derive(Clone, Copy, Debug)]
pub struct DecryptRequest {
    pub handle: Handle,
    pub contract: Address,
}

/// Read/write access to the questionnaire contract.
///
/// Reads are signer-bound: the remote operation is defined in terms of
/// "caller", so it goes through an authenticated channel. The write returns
/// only after transaction confirmation, not on acceptance into a pending
/// pool.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Fetch the caller's handles, one per tracked question in fixed order;
    /// [`Handle::UNSET`] for unanswered questions
    async fn get_my_answers(
        &self,
        contract: Address,
        signer: Address,
    ) -> Result<[Handle; QUESTION_COUNT], ServiceError>;

    /// Submit one encrypted answer and wait for confirmation. The ledger
    /// rejects unknown ordinals and duplicate submissions by the same caller.
    async fn submit_answer(
        &self,
        contract: Address,
        signer: Address,
        ordinal: u8,
        handle: Handle,
        proof: &[u8],
    ) -> Result<TxReceipt, ServiceError>;
}

/// Produces encryption sessions bound to a (contract, signer) pair
pub trait EncryptionService: Send + Sync {
    fn create_session(&self, contract: Address, signer: Address) -> Box<dyn EncryptionSession>;
}

/// One-shot encryption session: queue values, then finalize.
/// Finalize is CPU-heavy and potentially slow.
#[async_trait]
pub trait EncryptionSession: Send {
    fn add_u32(&mut self, value: u32);

    async fn finalize(self: Box<Self>) -> Result<EncryptedPayload, ServiceError>;
}

/// Produces or reuses decryption authorizations.
///
/// May return a cached, still-valid credential without prompting the signer,
/// amortizing the human-in-the-loop signing step. `Ok(None)` means the
/// signer declined.
#[async_trait]
pub trait AuthorizationCache: Send + Sync {
    async fn load_or_sign(
        &self,
        contracts: &[Address],
        signer: Address,
    ) -> Result<Option<DecryptionAuthorization>, ServiceError>;
}

/// Batch decryption keyed by handle
#[async_trait]
pub trait DecryptionService: Send + Sync {
    async fn user_decrypt(
        &self,
        requests: &[DecryptRequest],
        auth: &DecryptionAuthorization,
    ) -> Result<HashMap<Handle, u64>, ServiceError>;
}

// ---------------------------------------------------------------------------
// In-memory implementations for testing
// ---------------------------------------------------------------------------

/// Shared plaintext oracle linking [`InMemoryEncryptor`] and
/// [`InMemoryDecryptor`]: the encryptor registers handle → cleartext, the
/// decryptor looks it up
#[derive(Default)]
pub struct InMemoryFhe {
    plaintexts: Mutex<HashMap<Handle, u64>>,
    counter: AtomicU64,
}

impl InMemoryFhe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mint a unique handle for a value and remember its cleartext
    fn register(&self, value: u32) -> Handle {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let mut bytes = [0u8; HANDLE_LEN];
        bytes[..8].copy_from_slice(&n.to_be_bytes());
        bytes[8..12].copy_from_slice(&value.to_be_bytes());
        bytes[HANDLE_LEN - 1] = 0x01;
        let handle = Handle::from_bytes(bytes);
        self.plaintexts.lock().insert(handle, u64::from(value));
        handle
    }

    fn lookup(&self, handle: &Handle) -> Option<u64> {
        self.plaintexts.lock().get(handle).copied()
    }
}

/// Output shape the in-memory encryptor wraps its results in, to exercise
/// every recognized [`CiphertextBlob`] variant
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlobShape {
    Hex,
    Bytes,
    Buffer,
}

#[derive(Default)]
struct EncryptorShared {
    sessions_created: AtomicUsize,
    finalize_entered: AtomicUsize,
    finalize_completed: AtomicUsize,
    gate: Mutex<Option<Arc<Notify>>>,
}

/// Deterministic encryption double
pub struct InMemoryEncryptor {
    backend: Arc<InMemoryFhe>,
    shape: BlobShape,
    shared: Arc<EncryptorShared>,
}

impl InMemoryEncryptor {
    pub fn new(backend: Arc<InMemoryFhe>) -> Self {
        Self {
            backend,
            shape: BlobShape::Hex,
            shared: Arc::new(EncryptorShared::default()),
        }
    }

    pub fn with_shape(mut self, shape: BlobShape) -> Self {
        self.shape = shape;
        self
    }

    /// Make every subsequent finalize block until the returned handle is
    /// notified. Lets tests hold an operation in flight deterministically.
    pub fn hold_finalize(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.shared.gate.lock() = Some(gate.clone());
        gate
    }

    pub fn release_finalize(&self) {
        *self.shared.gate.lock() = None;
    }

    pub fn sessions_created(&self) -> usize {
        self.shared.sessions_created.load(Ordering::Relaxed)
    }

    pub fn finalize_entered(&self) -> usize {
        self.shared.finalize_entered.load(Ordering::Relaxed)
    }

    pub fn finalize_completed(&self) -> usize {
        self.shared.finalize_completed.load(Ordering::Relaxed)
    }
}

impl EncryptionService for InMemoryEncryptor {
    fn create_session(&self, _contract: Address, _signer: Address) -> Box<dyn EncryptionSession> {
        self.shared.sessions_created.fetch_add(1, Ordering::Relaxed);
        Box::new(InMemorySession {
            backend: self.backend.clone(),
            shape: self.shape,
            shared: self.shared.clone(),
            values: Vec::new(),
        })
    }
}

struct InMemorySession {
    backend: Arc<InMemoryFhe>,
    shape: BlobShape,
    shared: Arc<EncryptorShared>,
    values: Vec<u32>,
}

impl InMemorySession {
    fn wrap(&self, bytes: Vec<u8>) -> CiphertextBlob {
        match self.shape {
            BlobShape::Hex => CiphertextBlob::Hex(format!("0x{}", hex::encode(bytes))),
            BlobShape::Bytes => CiphertextBlob::Bytes(bytes),
            BlobShape::Buffer => CiphertextBlob::Buffer(bytes.into_boxed_slice()),
        }
    }
}

#[async_trait]
impl EncryptionSession for InMemorySession {
    fn add_u32(&mut self, value: u32) {
        self.values.push(value);
    }

    async fn finalize(self: Box<Self>) -> Result<EncryptedPayload, ServiceError> {
        self.shared.finalize_entered.fetch_add(1, Ordering::Relaxed);
        let gate = self.shared.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.values.is_empty() {
            return Err(ServiceError::new("no values queued for encryption"));
        }

        let mut handles = Vec::with_capacity(self.values.len());
        let mut proof = Vec::new();
        for value in &self.values {
            let handle = self.backend.register(*value);
            proof.extend_from_slice(handle.as_bytes());
            handles.push(self.wrap(handle.as_bytes().to_vec()));
        }

        self.shared.finalize_completed.fetch_add(1, Ordering::Relaxed);
        let input_proof = self.wrap(proof);
        Ok(EncryptedPayload {
            handles,
            input_proof,
        })
    }
}

/// Ledger double enforcing the contract's rejection rules (unknown ordinal,
/// duplicate submission by the same caller)
#[derive(Default)]
pub struct InMemoryLedger {
    rows: Mutex<HashMap<(Address, Address), [Handle; QUESTION_COUNT]>>,
    read_calls: AtomicUsize,
    write_calls: AtomicUsize,
    fail_reads: AtomicBool,
    read_gate: Mutex<Option<Arc<Notify>>>,
    next_block: AtomicU64,
}

impl InMemoryLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every subsequent read block until the returned handle is
    /// notified
    pub fn hold_reads(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.read_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn release_reads(&self) {
        *self.read_gate.lock() = None;
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls.load(Ordering::Relaxed)
    }

    pub fn write_calls(&self) -> usize {
        self.write_calls.load(Ordering::Relaxed)
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    /// Overwrite a stored handle directly, bypassing the duplicate check.
    /// Simulates ledger-side churn between refreshes.
    pub fn force_set(&self, contract: Address, signer: Address, ordinal: usize, handle: Handle) {
        let mut rows = self.rows.lock();
        let row = rows
            .entry((contract, signer))
            .or_insert([Handle::UNSET; QUESTION_COUNT]);
        row[ordinal] = handle;
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn get_my_answers(
        &self,
        contract: Address,
        signer: Address,
    ) -> Result<[Handle; QUESTION_COUNT], ServiceError> {
        self.read_calls.fetch_add(1, Ordering::Relaxed);
        let gate = self.read_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(ServiceError::new("ledger read failed").with_code(-32000));
        }
        let rows = self.rows.lock();
        Ok(rows
            .get(&(contract, signer))
            .copied()
            .unwrap_or([Handle::UNSET; QUESTION_COUNT]))
    }

    async fn submit_answer(
        &self,
        contract: Address,
        signer: Address,
        ordinal: u8,
        handle: Handle,
        proof: &[u8],
    ) -> Result<TxReceipt, ServiceError> {
        self.write_calls.fetch_add(1, Ordering::Relaxed);
        if usize::from(ordinal) >= QUESTION_COUNT {
            return Err(ServiceError::new("execution reverted").with_reason("InvalidQuestionId"));
        }
        if proof.is_empty() {
            return Err(ServiceError::new("execution reverted").with_reason("InvalidProof"));
        }

        let mut rows = self.rows.lock();
        let row = rows
            .entry((contract, signer))
            .or_insert([Handle::UNSET; QUESTION_COUNT]);
        if row[usize::from(ordinal)].is_set() {
            return Err(ServiceError::new("execution reverted").with_reason("AlreadyAnswered"));
        }
        row[usize::from(ordinal)] = handle;

        let mut tx_hash = [0u8; 32];
        tx_hash.copy_from_slice(handle.as_bytes());
        tx_hash[0] ^= 0x5A;
        Ok(TxReceipt {
            tx_hash,
            block_number: self.next_block.fetch_add(1, Ordering::Relaxed) + 1,
        })
    }
}

/// Authorization cache double: counts signing prompts, reuses a cached
/// credential for matching scope, can simulate the signer declining
#[derive(Default)]
pub struct InMemoryAuthCache {
    prompts: AtomicUsize,
    sign_entered: AtomicUsize,
    decline: AtomicBool,
    cached: Mutex<Option<DecryptionAuthorization>>,
    sign_gate: Mutex<Option<Arc<Notify>>>,
}

impl InMemoryAuthCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every subsequent `load_or_sign` block until the returned handle
    /// is notified. Simulates the human sitting on the signing prompt.
    pub fn hold_signing(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.sign_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn release_signing(&self) {
        *self.sign_gate.lock() = None;
    }

    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::Relaxed)
    }

    pub fn sign_entered(&self) -> usize {
        self.sign_entered.load(Ordering::Relaxed)
    }

    pub fn set_decline(&self, decline: bool) {
        self.decline.store(decline, Ordering::Relaxed);
    }
}

#[async_trait]
impl AuthorizationCache for InMemoryAuthCache {
    async fn load_or_sign(
        &self,
        contracts: &[Address],
        signer: Address,
    ) -> Result<Option<DecryptionAuthorization>, ServiceError> {
        self.sign_entered.fetch_add(1, Ordering::Relaxed);
        let gate = self.sign_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.decline.load(Ordering::Relaxed) {
            return Ok(None);
        }

        let mut cached = self.cached.lock();
        if let Some(auth) = cached.as_ref() {
            if auth.user_address == signer && auth.contract_addresses == contracts {
                return Ok(Some(auth.clone()));
            }
        }

        let n = self.prompts.fetch_add(1, Ordering::Relaxed) + 1;
        let auth = DecryptionAuthorization {
            private_key: format!("priv-{n}"),
            public_key: format!("pub-{n}"),
            signature: format!("sig-{n}"),
            contract_addresses: contracts.to_vec(),
            user_address: signer,
            start_timestamp: 1_700_000_000,
            duration_days: 7,
        };
        *cached = Some(auth.clone());
        Ok(Some(auth))
    }
}

/// Decryption double reading cleartexts from the shared [`InMemoryFhe`]
pub struct InMemoryDecryptor {
    backend: Arc<InMemoryFhe>,
    calls: AtomicUsize,
    fail: AtomicBool,
}

impl InMemoryDecryptor {
    pub fn new(backend: Arc<InMemoryFhe>) -> Self {
        Self {
            backend,
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }
}

#[async_trait]
impl DecryptionService for InMemoryDecryptor {
    async fn user_decrypt(
        &self,
        requests: &[DecryptRequest],
        _auth: &DecryptionAuthorization,
    ) -> Result<HashMap<Handle, u64>, ServiceError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.fail.load(Ordering::Relaxed) {
            return Err(ServiceError::new("decryption service unavailable"));
        }

        let mut out = HashMap::with_capacity(requests.len());
        for req in requests {
            let value = self
                .backend
                .lookup(&req.handle)
                .ok_or_else(|| ServiceError::new(format!("unknown handle {}", req.handle)))?;
            out.insert(req.handle, value);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    #[tokio::test]
    async fn test_encrypt_then_decrypt_round_trip() {
        let backend = InMemoryFhe::new();
        let encryptor = InMemoryEncryptor::new(backend.clone());
        let decryptor = InMemoryDecryptor::new(backend);

        let mut session = encryptor.create_session(addr(1), addr(2));
        session.add_u32(1234);
        let payload = session.finalize().await.unwrap();
        let handle = crate::handle::normalize_handle(&payload.handles[0]).unwrap();

        let auth = InMemoryAuthCache::new()
            .load_or_sign(&[addr(1)], addr(2))
            .await
            .unwrap()
            .unwrap();
        let clear = decryptor
            .user_decrypt(
                &[DecryptRequest {
                    handle,
                    contract: addr(1),
                }],
                &auth,
            )
            .await
            .unwrap();
        assert_eq!(clear.get(&handle), Some(&1234));
    }

    #[tokio::test]
    async fn test_ledger_rejects_duplicate_submission() {
        let ledger = InMemoryLedger::new();
        let handle = Handle::from_bytes([7; 32]);

        ledger
            .submit_answer(addr(1), addr(2), 0, handle, &[1])
            .await
            .unwrap();
        let err = ledger
            .submit_answer(addr(1), addr(2), 0, handle, &[1])
            .await
            .unwrap_err();
        assert_eq!(err.reason.as_deref(), Some("AlreadyAnswered"));
    }

    #[tokio::test]
    async fn test_ledger_rejects_unknown_ordinal() {
        let ledger = InMemoryLedger::new();
        let err = ledger
            .submit_answer(addr(1), addr(2), 9, Handle::from_bytes([7; 32]), &[1])
            .await
            .unwrap_err();
        assert_eq!(err.reason.as_deref(), Some("InvalidQuestionId"));
    }

    #[tokio::test]
    async fn test_auth_cache_reuses_credential() {
        let cache = InMemoryAuthCache::new();
        let a = cache.load_or_sign(&[addr(1)], addr(2)).await.unwrap();
        let b = cache.load_or_sign(&[addr(1)], addr(2)).await.unwrap();
        assert!(a.is_some() && b.is_some());
        assert_eq!(cache.prompts(), 1);

        // Different scope prompts again
        cache.load_or_sign(&[addr(3)], addr(2)).await.unwrap();
        assert_eq!(cache.prompts(), 2);
    }

    #[tokio::test]
    async fn test_encryptor_shapes_all_normalize() {
        for shape in [BlobShape::Hex, BlobShape::Bytes, BlobShape::Buffer] {
            let backend = InMemoryFhe::new();
            let encryptor = InMemoryEncryptor::new(backend).with_shape(shape);
            let mut session = encryptor.create_session(addr(1), addr(2));
            session.add_u32(42);
            let payload = session.finalize().await.unwrap();
            assert!(crate::handle::normalize_handle(&payload.handles[0]).is_ok());
            assert!(crate::handle::normalize_proof(&payload.input_proof).is_ok());
        }
    }
}

//! Submission/Decryption Orchestrator
//!
//! Owns all workflow state for the encrypted questionnaire and sequences the
//! external collaborators: encrypt an answer client-side, submit it exactly
//! once per question through a confirmed transaction, track the resulting
//! ciphertext handles, and recover cleartexts through the signature-gated
//! decryption exchange.
//!
//! # Workflow
//!
//! 1. **Refresh** - signer-bound read of the caller's three handles
//! 2. **Submit** - validate, yield, encrypt, checkpoint, normalize, write,
//!    confirm, checkpoint, refresh
//! 3. **Decrypt** - all-or-nothing: authorization, checkpoint, batch
//!    decrypt, checkpoint, atomic rewrite of every cleartext
//!
//! Every operation is single-flight, re-checks the session identity after
//! each suspension point, and converts every failure into a status message
//! plus unchanged state. Nothing escapes the operation boundary as an
//! unhandled fault, and locks release on every exit path.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock as SyncRwLock;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::SurveyConfig;
use crate::deployment::{Address, Deployment, DeploymentMap};
use crate::error::{ServiceError, SurveyError, SurveyResult};
use crate::handle::{normalize_handle, normalize_proof, Handle};
use crate::question::{
    initial_questions, validate_answer, DecryptedSummary, QuestionState, QUESTIONS, QUESTION_COUNT,
};
use crate::services::{
    AuthorizationCache, DecryptRequest, DecryptionService, EncryptionService, LedgerClient,
};
use crate::session::{OpLock, RefreshLatch, SessionIdentity, StalenessToken};

const MSG_CONNECT: &str = "Connect a wallet to continue.";

/// Everything the presentation layer needs to render the questionnaire
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveySnapshot {
    pub questions: Vec<QuestionState>,
    pub summary: Option<DecryptedSummary>,
    pub status: String,
    pub deployed: bool,
    pub refreshing: bool,
    pub submitting: bool,
    pub decrypting: bool,
    pub can_refresh: bool,
    pub can_submit: bool,
    pub can_decrypt: bool,
}

/// Async-visible shared state, mutated only by whole-object replacement
struct SurveyState {
    questions: [QuestionState; QUESTION_COUNT],
    summary: Option<DecryptedSummary>,
    status: String,
}

struct Inner {
    debounce: Duration,
    call_timeout: Option<Duration>,
    deployments: DeploymentMap,

    ledger: SyncRwLock<Option<Arc<dyn LedgerClient>>>,
    encryptor: SyncRwLock<Option<Arc<dyn EncryptionService>>>,
    auth_cache: SyncRwLock<Option<Arc<dyn AuthorizationCache>>>,
    decryptor: SyncRwLock<Option<Arc<dyn DecryptionService>>>,

    // Synchronous cells: guard checks and staleness checkpoints must not
    // suspend
    session: SyncRwLock<Option<SessionIdentity>>,
    deployment: SyncRwLock<Deployment>,

    state: RwLock<SurveyState>,

    refresh_lock: OpLock,
    submit_lock: OpLock,
    decrypt_lock: OpLock,
    latch: RefreshLatch,
}

/// The orchestrator. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct SurveyOrchestrator {
    inner: Arc<Inner>,
}

impl SurveyOrchestrator {
    pub fn new(config: SurveyConfig) -> Self {
        let deployments = config.deployment_map();
        let deployment = deployments.resolve(None);
        Self {
            inner: Arc::new(Inner {
                debounce: config.debounce(),
                call_timeout: config.call_timeout(),
                deployments,
                ledger: SyncRwLock::new(None),
                encryptor: SyncRwLock::new(None),
                auth_cache: SyncRwLock::new(None),
                decryptor: SyncRwLock::new(None),
                session: SyncRwLock::new(None),
                deployment: SyncRwLock::new(deployment),
                state: RwLock::new(SurveyState {
                    questions: initial_questions(),
                    summary: None,
                    status: "Connect a wallet to begin.".to_string(),
                }),
                refresh_lock: OpLock::new("refresh"),
                submit_lock: OpLock::new("submit"),
                decrypt_lock: OpLock::new("decrypt"),
                latch: RefreshLatch::new(),
            }),
        }
    }

    pub fn with_ledger(self, ledger: Arc<dyn LedgerClient>) -> Self {
        *self.inner.ledger.write() = Some(ledger);
        self
    }

    pub fn with_encryption(self, encryptor: Arc<dyn EncryptionService>) -> Self {
        *self.inner.encryptor.write() = Some(encryptor);
        self
    }

    pub fn with_authorization(self, cache: Arc<dyn AuthorizationCache>) -> Self {
        *self.inner.auth_cache.write() = Some(cache);
        self
    }

    pub fn with_decryption(self, decryptor: Arc<dyn DecryptionService>) -> Self {
        *self.inner.decryptor.write() = Some(decryptor);
        self
    }

    // -- session intake -----------------------------------------------------

    /// Feed a wallet event: `Some((chain_id, signer))` on connect or switch,
    /// `None` on disconnect.
    ///
    /// An identity change discards displayed state, which belongs to the
    /// previous identity. The one-shot automatic refresh fires (debounced)
    /// when the (address, channel, signer) triple first becomes complete,
    /// and re-arms whenever it breaks.
    pub async fn set_session(&self, session: Option<(u64, Address)>) {
        let new_identity = session.map(|(chain_id, signer)| SessionIdentity { chain_id, signer });
        let resolved = self.inner.deployments.resolve(session.map(|(c, _)| c));

        let identity_changed = {
            let mut current = self.inner.session.write();
            let changed = *current != new_identity;
            *current = new_identity;
            *self.inner.deployment.write() = resolved.clone();
            changed
        };

        if identity_changed {
            let mut state = self.inner.state.write().await;
            state.questions = initial_questions();
            state.summary = None;
            state.status = match (&new_identity, resolved.is_deployed()) {
                (None, _) => MSG_CONNECT.to_string(),
                (Some(_), false) => {
                    format!("Contract is not deployed on {}.", resolved.name)
                }
                (Some(_), true) => "Wallet connected.".to_string(),
            };
            debug!(session = ?new_identity, contract = %resolved.address, "session replaced");
        }

        if self.is_ready() {
            if identity_changed {
                // the old identity's one-shot no longer counts
                self.inner.latch.rearm();
            }
            if self.inner.latch.try_fire() {
                let orch = self.clone();
                let armed_for = new_identity;
                let debounce = self.inner.debounce;
                tokio::spawn(async move {
                    tokio::time::sleep(debounce).await;
                    if orch.current_session() == armed_for && orch.is_ready() {
                        debug!("auto-refresh firing");
                        orch.refresh().await;
                    }
                });
            }
        } else {
            self.inner.latch.rearm();
        }
    }

    // -- presentation surface -----------------------------------------------

    pub async fn snapshot(&self) -> SurveySnapshot {
        let state = self.inner.state.read().await;
        let deployed = self.inner.deployment.read().is_deployed();
        let ready = self.is_ready();

        let refreshing = self.inner.refresh_lock.is_busy();
        let submitting = self.inner.submit_lock.is_busy();
        let decrypting = self.inner.decrypt_lock.is_busy();

        let all_answered = state.questions.iter().all(|q| q.is_answered());
        let can_encrypt = self.inner.encryptor.read().is_some();
        let can_reveal =
            self.inner.auth_cache.read().is_some() && self.inner.decryptor.read().is_some();

        SurveySnapshot {
            questions: state.questions.to_vec(),
            summary: state.summary.clone(),
            status: state.status.clone(),
            deployed,
            refreshing,
            submitting,
            decrypting,
            can_refresh: ready && !refreshing && !submitting && !decrypting,
            can_submit: ready && can_encrypt && !refreshing && !submitting,
            can_decrypt: ready && can_reveal && all_answered && !refreshing && !decrypting,
        }
    }

    // -- operations ---------------------------------------------------------

    /// Fetch the caller's handles and commit them as a single state
    /// transition. Preconditions not met or an instance already in flight is
    /// a silent no-op; a failed read leaves existing state untouched.
    pub async fn refresh(&self) {
        if self.inner.submit_lock.is_busy() || self.inner.decrypt_lock.is_busy() {
            debug!("refresh dropped: another operation in flight");
            return;
        }
        let Some(_guard) = self.inner.refresh_lock.try_acquire() else {
            return;
        };
        if let Err(err) = self.refresh_inner(false).await {
            self.report("refresh", err).await;
        }
    }

    /// Encrypt one answer and write it through a confirmed transaction.
    pub async fn submit(&self, question: usize, value: f64) {
        match self.submit_inner(question, value).await {
            Ok(()) => {}
            Err(err) => {
                let hard = matches!(
                    err,
                    SurveyError::Service(_)
                        | SurveyError::MalformedResponse(_)
                        | SurveyError::Timeout(_)
                );
                self.report("submit", err).await;
                if hard {
                    // The write may have landed on-ledger despite the
                    // client-side error; pick it up if so.
                    if let Some(_guard) = self.inner.refresh_lock.try_acquire() {
                        if let Err(e) = self.refresh_inner(true).await {
                            debug!(error = %e, "best-effort refresh after failed submit");
                        }
                    }
                }
            }
        }
    }

    /// Reveal all answered questions. All-or-nothing over the tracked set.
    pub async fn decrypt(&self) {
        if let Err(err) = self.decrypt_inner().await {
            self.report("decrypt", err).await;
        }
    }

    // -- internals ----------------------------------------------------------

    fn current_session(&self) -> Option<SessionIdentity> {
        *self.inner.session.read()
    }

    fn current_contract(&self) -> Address {
        self.inner.deployment.read().address
    }

    fn is_ready(&self) -> bool {
        self.current_session().is_some()
            && self.inner.deployment.read().is_deployed()
            && self.inner.ledger.read().is_some()
    }

    fn require_ready(&self) -> SurveyResult<(SessionIdentity, Address)> {
        let session = self
            .current_session()
            .ok_or_else(|| SurveyError::not_ready(MSG_CONNECT))?;
        let deployment = self.inner.deployment.read().clone();
        if !deployment.is_deployed() {
            return Err(SurveyError::NotDeployed);
        }
        Ok((session, deployment.address))
    }

    fn ledger(&self) -> SurveyResult<Arc<dyn LedgerClient>> {
        self.inner
            .ledger
            .read()
            .clone()
            .ok_or_else(|| SurveyError::not_ready(MSG_CONNECT))
    }

    fn checkpoint(&self, token: &StalenessToken) -> SurveyResult<()> {
        token
            .check(self.current_session(), self.current_contract())
            .map_err(SurveyError::Stale)
    }

    async fn set_status(&self, msg: impl Into<String>) {
        let msg = msg.into();
        debug!(status = %msg);
        self.inner.state.write().await.status = msg;
    }

    fn service_failure(what: &'static str, err: ServiceError) -> SurveyError {
        error!(
            op = what,
            code = ?err.code,
            data = ?err.data,
            reason = ?err.reason,
            "{}", err.message
        );
        SurveyError::Service(err)
    }

    /// Run a remote call under the configured timeout, logging failures with
    /// whatever context the service reported
    async fn guarded<T, F>(&self, what: &'static str, fut: F) -> SurveyResult<T>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        let result = match self.inner.call_timeout {
            Some(limit) => tokio::time::timeout(limit, fut)
                .await
                .map_err(|_| SurveyError::Timeout(what))?,
            None => fut.await,
        };
        result.map_err(|e| Self::service_failure(what, e))
    }

    async fn refresh_inner(&self, quiet: bool) -> SurveyResult<()> {
        let Ok((session, contract)) = self.require_ready() else {
            debug!("refresh skipped: wallet or deployment not ready");
            return Ok(());
        };
        let Ok(ledger) = self.ledger() else {
            debug!("refresh skipped: no ledger channel");
            return Ok(());
        };

        let token = StalenessToken::capture(session, contract);
        if !quiet {
            self.set_status("Refreshing answers...").await;
        }

        let handles = self
            .guarded(
                "handle refresh",
                ledger.get_my_answers(contract, session.signer),
            )
            .await?;

        // Checked under the write guard: nothing can replace the session
        // between this check and the commit below
        let mut state = self.inner.state.write().await;
        self.checkpoint(&token)?;
        let mut questions = state.questions.clone();
        let mut invalidated = 0usize;
        for (q, new_handle) in questions.iter_mut().zip(handles) {
            if q.handle != new_handle {
                if q.decrypted.take().is_some() {
                    invalidated += 1;
                }
                q.handle = new_handle;
            }
        }
        if invalidated > 0 {
            // a changed handle invalidates any cleartext cached against it
            state.summary = None;
            warn!(invalidated, "handles changed; cached cleartext discarded");
        }
        let answered = questions.iter().filter(|q| q.is_answered()).count();
        state.questions = questions;
        if !quiet {
            state.status = "Answers refreshed.".to_string();
        }
        info!(answered, "handles refreshed");
        Ok(())
    }

    async fn submit_inner(&self, question: usize, value: f64) -> SurveyResult<()> {
        // Validation precedes any lock or I/O
        let spec = QUESTIONS
            .get(question)
            .ok_or_else(|| SurveyError::validation(format!("unknown question {question}")))?;
        let value = validate_answer(value)?;

        if self.inner.refresh_lock.is_busy() {
            debug!("submit dropped: refresh in flight");
            return Ok(());
        }
        let Some(_guard) = self.inner.submit_lock.try_acquire() else {
            return Ok(());
        };

        let (session, contract) = self.require_ready()?;
        let encryptor = self
            .inner
            .encryptor
            .read()
            .clone()
            .ok_or_else(|| SurveyError::not_ready(MSG_CONNECT))?;
        let ledger = self.ledger()?;
        let token = StalenessToken::capture(session, contract);

        self.set_status(format!("Encrypting answer to \"{}\"...", spec.text))
            .await;
        // Let a responsiveness-sensitive caller repaint before the CPU-heavy
        // encryption step
        tokio::task::yield_now().await;

        let mut enc_session = encryptor.create_session(contract, session.signer);
        enc_session.add_u32(value);
        let payload = enc_session
            .finalize()
            .await
            .map_err(|e| Self::service_failure("encryption", e))?;

        // Do not use the encryption result against a session it no longer
        // belongs to
        self.checkpoint(&token)?;

        let handle_blob = payload
            .handles
            .first()
            .ok_or_else(|| SurveyError::malformed("encryption returned no handles"))?;
        let handle = normalize_handle(handle_blob)?;
        let proof = normalize_proof(&payload.input_proof)?;

        self.set_status("Submitting encrypted answer...").await;
        let receipt = self
            .guarded(
                "transaction confirmation",
                ledger.submit_answer(contract, session.signer, spec.ordinal, handle, &proof),
            )
            .await?;
        info!(
            question = spec.key,
            tx = %hex::encode(&receipt.tx_hash[..8]),
            block = receipt.block_number,
            "answer confirmed"
        );

        // The write is on-ledger and cannot be undone, but local state must
        // not be updated as if it reflects a now-irrelevant session
        self.checkpoint(&token)?;

        self.set_status("Submitted; refreshing...").await;
        let followup = match self.inner.refresh_lock.try_acquire() {
            Some(_refresh_guard) => self.refresh_inner(true).await,
            None => Ok(()),
        };
        match followup {
            Ok(()) => {
                self.set_status(format!("Answer to \"{}\" submitted.", spec.text))
                    .await;
            }
            Err(e) => {
                warn!(error = %e, "submitted, but follow-up refresh failed");
                self.set_status(
                    "Answer submitted, but the display could not be updated. Try refreshing.",
                )
                .await;
            }
        }
        Ok(())
    }

    async fn decrypt_inner(&self) -> SurveyResult<()> {
        if self.inner.refresh_lock.is_busy() {
            debug!("decrypt dropped: refresh in flight");
            return Ok(());
        }
        let Some(_guard) = self.inner.decrypt_lock.try_acquire() else {
            return Ok(());
        };

        let (session, contract) = self.require_ready()?;
        let auth_cache = self
            .inner
            .auth_cache
            .read()
            .clone()
            .ok_or_else(|| SurveyError::not_ready(MSG_CONNECT))?;
        let decryptor = self
            .inner
            .decryptor
            .read()
            .clone()
            .ok_or_else(|| SurveyError::not_ready(MSG_CONNECT))?;

        // All-or-nothing: every tracked question needs a handle before any
        // authorization or decryption call is made
        let handles: Vec<Handle> = {
            let state = self.inner.state.read().await;
            state.questions.iter().map(|q| q.handle).collect()
        };
        if handles.iter().any(|h| !h.is_set()) {
            return Err(SurveyError::not_ready(
                "Answer all questions before decrypting.",
            ));
        }

        let token = StalenessToken::capture(session, contract);
        self.set_status("Requesting decryption authorization...").await;
        let auth = self
            .guarded(
                "authorization",
                auth_cache.load_or_sign(&[contract], session.signer),
            )
            .await?
            .ok_or_else(|| SurveyError::not_ready("Decryption authorization was declined."))?;
        // The signing prompt may have waited on a human
        self.checkpoint(&token)?;

        self.set_status("Decrypting answers...").await;
        let requests: Vec<DecryptRequest> = handles
            .iter()
            .map(|&handle| DecryptRequest { handle, contract })
            .collect();
        let cleartexts = self
            .guarded("decryption", decryptor.user_decrypt(&requests, &auth))
            .await?;

        // Atomic rewrite: all three values update together or none do. The
        // staleness check runs under the write guard so the session cannot be
        // replaced between the check and the commit.
        let mut state = self.inner.state.write().await;
        self.checkpoint(&token)?;
        let mut questions = state.questions.clone();
        for q in questions.iter_mut() {
            let value = cleartexts.get(&q.handle).copied().ok_or_else(|| {
                SurveyError::malformed(format!("no cleartext returned for {}", q.key))
            })?;
            q.decrypted = Some(value);
        }
        let summary = DecryptedSummary::from_questions(&questions)?;
        state.questions = questions;
        state.summary = Some(summary);
        state.status = "Answers decrypted.".to_string();
        info!("all answers decrypted");
        Ok(())
    }

    async fn report(&self, op: &'static str, err: SurveyError) {
        let msg = match &err {
            SurveyError::Validation(m) | SurveyError::NotReady(m) => m.clone(),
            SurveyError::Stale(dim) => {
                warn!(op, dimension = %dim, "stale session, result discarded");
                format!(
                    "Network or account changed ({dim}); the {op} was discarded. \
                     Retry after reconnecting."
                )
            }
            SurveyError::NotDeployed => {
                let deployment = self.inner.deployment.read().clone();
                format!("Contract is not deployed on {}.", deployment.name)
            }
            other => {
                error!(op, error = %other, "operation failed");
                format!("{op} failed: {other}")
            }
        };
        self.set_status(msg).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::LOCAL_CHAIN_ID;
    use crate::services::{InMemoryEncryptor, InMemoryFhe, InMemoryLedger};

    fn signer(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    #[tokio::test]
    async fn test_initial_snapshot() {
        let orch = SurveyOrchestrator::new(SurveyConfig::default());
        let snap = orch.snapshot().await;

        assert_eq!(snap.questions.len(), QUESTION_COUNT);
        assert!(snap.questions.iter().all(|q| !q.is_answered()));
        assert!(snap.summary.is_none());
        assert!(snap.deployed); // built-in local deployment
        assert!(!snap.can_refresh); // no wallet yet
        assert!(!snap.can_submit);
        assert!(!snap.can_decrypt);
        assert_eq!(snap.status, "Connect a wallet to begin.");
    }

    #[tokio::test]
    async fn test_undeployed_network_is_soft() {
        let config = SurveyConfig {
            deployments: vec![Deployment {
                address: Address::ZERO,
                chain_id: LOCAL_CHAIN_ID,
                name: "Localhost".to_string(),
            }],
            ..Default::default()
        };
        let ledger = InMemoryLedger::new();
        let orch = SurveyOrchestrator::new(config).with_ledger(ledger.clone());
        orch.set_session(Some((LOCAL_CHAIN_ID, signer(1)))).await;

        let snap = orch.snapshot().await;
        assert!(!snap.deployed);
        assert!(!snap.can_refresh && !snap.can_submit && !snap.can_decrypt);
        assert!(snap.status.contains("not deployed"));

        // Operations no-op rather than throw
        orch.refresh().await;
        assert_eq!(ledger.read_calls(), 0);
    }

    #[tokio::test]
    async fn test_validation_takes_no_lock_and_makes_no_calls() {
        let backend = InMemoryFhe::new();
        let encryptor = Arc::new(InMemoryEncryptor::new(backend));
        let ledger = InMemoryLedger::new();
        let orch = SurveyOrchestrator::new(SurveyConfig::default())
            .with_ledger(ledger.clone())
            .with_encryption(encryptor.clone());
        orch.set_session(Some((LOCAL_CHAIN_ID, signer(1)))).await;

        orch.submit(0, 1.5).await;
        let snap = orch.snapshot().await;
        assert!(snap.status.contains("whole numbers"));

        orch.submit(0, -1.0).await;
        orch.submit(0, 4_294_967_296.0).await;
        let snap = orch.snapshot().await;
        assert!(snap.status.contains("between"));

        orch.submit(99, 1.0).await;
        let snap = orch.snapshot().await;
        assert!(snap.status.contains("unknown question"));

        assert_eq!(encryptor.sessions_created(), 0);
        assert_eq!(ledger.write_calls(), 0);
        assert!(!orch.snapshot().await.submitting);
    }
}

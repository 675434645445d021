//! sealed-survey: Client-Side Encrypted Questionnaire Orchestrator
//!
//! A wallet holder submits numeric answers to a fixed set of questions. Each
//! answer is encrypted client-side before it leaves the process, stored on a
//! ledger in encrypted form, and later decrypted only by the original
//! submitter through an authorization-gated decryption exchange.
//!
//! The centerpiece is [`SurveyOrchestrator`]: the stateful workflow that
//! turns a raw numeric input into an authenticated encrypted payload,
//! submits it exactly once per question through a confirmed transaction,
//! tracks per-question ciphertext handles, and recovers cleartexts on
//! demand, defending throughout against concurrent re-entrancy and against
//! the wallet's chain or account changing mid-flight.
//!
//! # Module Organization
//!
//! - [`orchestrator`]: the submission/decryption workflow engine
//! - [`services`]: trait seams for the ledger client, encryption service,
//!   authorization cache, and decryption service, plus in-memory doubles
//! - [`question`]: the static question set and its derived views
//! - [`handle`]: ciphertext handles and canonical encoding
//! - [`deployment`]: per-network contract resolution
//! - [`session`]: session identity, staleness checkpoints, single-flight
//! - [`config`]: TOML-backed orchestrator configuration
//! - [`error`]: the error taxonomy

pub mod config;
pub mod deployment;
pub mod error;
pub mod handle;
pub mod orchestrator;
pub mod question;
pub mod services;
pub mod session;

pub use config::{ConfigError, SurveyConfig};
pub use deployment::{Address, Deployment, DeploymentMap, LOCAL_CHAIN_ID, TESTNET_CHAIN_ID};
pub use error::{ServiceError, StaleDimension, SurveyError, SurveyResult};
pub use handle::{normalize_handle, normalize_proof, CiphertextBlob, Handle, HANDLE_LEN};
pub use orchestrator::{SurveyOrchestrator, SurveySnapshot};
pub use question::{
    validate_answer, DecryptedSummary, QuestionSpec, QuestionState, QUESTIONS, QUESTION_COUNT,
};
pub use services::{
    AuthorizationCache, DecryptRequest, DecryptionAuthorization, DecryptionService,
    EncryptedPayload, EncryptionService, EncryptionSession, LedgerClient, TxReceipt,
};
pub use session::{OpLock, RefreshLatch, SessionIdentity, StalenessToken};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::SurveyConfig;
    pub use crate::deployment::{Address, Deployment};
    pub use crate::error::{SurveyError, SurveyResult};
    pub use crate::handle::Handle;
    pub use crate::orchestrator::{SurveyOrchestrator, SurveySnapshot};
    pub use crate::question::{DecryptedSummary, QuestionState, QUESTIONS};
    pub use crate::services::{
        AuthorizationCache, DecryptionService, EncryptionService, LedgerClient,
    };
}

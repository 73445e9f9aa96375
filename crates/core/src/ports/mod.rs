//! Repository and sink ports. `meridian-control` implements these against
//! SQLite; tests implement them against in-memory fakes. No trait in this
//! module performs I/O itself — it only describes the shape of it.

pub mod agent_repository;
pub mod agent_token_repository;
pub mod audit_sink;
pub mod campaign_repository;
pub mod execution_repository;
pub mod installation_key_repository;
pub mod tenant_repository;
pub mod workflow_repository;

pub use agent_repository::AgentRepository;
pub use agent_token_repository::AgentTokenRepository;
pub use audit_sink::AuditSink;
pub use campaign_repository::{CampaignPhaseRepository, CampaignRepository};
pub use execution_repository::ExecutionRepository;
pub use installation_key_repository::InstallationKeyRepository;
pub use tenant_repository::TenantRepository;
pub use workflow_repository::WorkflowRepository;

//! Control-plane services: quota guard, enrollment, agent registry,
//! workflow store, campaign engine, dispatch client. Each wraps one or
//! more repository ports behind a small façade, the way the teacher's
//! `services/` modules wrap `domain::ports` traits.

pub mod campaign_engine;
pub mod dispatch_client;
pub mod enrollment_service;
pub mod registry_service;
pub mod tenant_service;
pub mod workflow_service;

pub use campaign_engine::CampaignEngine;
pub use dispatch_client::DispatchClient;
pub use enrollment_service::EnrollmentService;
pub use registry_service::RegistryService;
pub use tenant_service::TenantService;
pub use workflow_service::WorkflowService;

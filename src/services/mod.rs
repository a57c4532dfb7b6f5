// ABOUTME: Business-logic services over the database layer
// ABOUTME: Handlers construct these cheaply per request from the shared context

pub mod approval;
pub mod code_analysis;
pub mod execution_log;
pub mod external_source;
pub mod global_config;
pub mod secret;
pub mod setting;
pub mod tool;

pub use approval::ApprovalService;
pub use execution_log::ExecutionLogService;
pub use external_source::ExternalSourceService;
pub use global_config::GlobalConfigService;
pub use secret::SecretService;
pub use setting::SettingService;
pub use tool::ToolService;

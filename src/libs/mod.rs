// Provisioning engine: context, manifest loading, orchestration, state and probing.

pub mod context;
pub mod manifest_loading;
pub mod orchestrator;
pub mod runner;
pub mod smoke_tester;
pub mod state_management;
pub mod utilities;

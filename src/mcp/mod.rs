// ABOUTME: MCP protocol surface: gateway dispatch and the management tool dispatcher
// ABOUTME: Management tools run locally; everything else forwards to the sandbox

pub mod gateway;
pub mod management;
pub mod protocol;

// Encrypted credential vault
pub mod vault;

// Platform definition registry
pub mod platforms;

// Pre-execution requirement checking
pub mod requirements;

// Payment webhook verification and credit ledger
pub mod billing;

// HTTP API
pub mod api;

// Service configuration
pub mod config;

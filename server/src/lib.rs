pub mod authz;
pub mod devices;
pub mod errors;
pub mod metrics;
pub mod model;
pub mod presets;
pub mod rest;
pub mod store;
pub mod validate;

/// Run finished and the final report was produced.
pub const OK: i32 = 0;

/// The runtime failed mid-run (internal fault).
pub const RUNTIME_ERROR: i32 = 1;

/// The script/configuration was rejected before any traffic started.
pub const CONFIG_ERROR: i32 = 2;

//! Ready-made local tools.

pub mod local_time;

pub use local_time::{local_time_toolkit, LocalTimeTool, LOCAL_TIME_TOOL};

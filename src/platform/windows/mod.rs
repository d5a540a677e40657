mod debug_output;
mod memory;

pub use debug_output::DebugOutputWriter;
pub use memory::ProcessMemory;

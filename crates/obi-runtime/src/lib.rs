//! Obi VM memory manager: the size-classed free-list allocator, the
//! parallel mark-and-sweep collector, and the virtual dispatch cache.
//!
//! The interpreter and JIT back-end live outside this repository; they
//! interact with the manager through allocation calls (passing their live
//! operand stack), frame-root registration, and the dispatch cache.

pub mod memory;
pub mod program;

pub use memory::{
    MemoryManager, MemoryType, StackFrame, StackFrameMonitor, EXTRA_BUF_SIZE, INF_ENDING,
    MEM_MAX, MEM_POOL_LIST_MAX,
};
pub use program::{MethodRef, StackClass, StackDclr, StackMethod, StackProgram};

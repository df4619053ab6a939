//! The wire protocol of the execution engine.
//!
//! # Architecture
//!
//! - [`command`] - command and reply byte values
//! - [`encoder`] - 7-bit integer and block encodings and the packet builders
//! - [`flash`] - the flash header and startup flags
//! - [`transport`] - the [`Transport`] seam, reply decoding and an in-memory recording device
//! - [`session`] - incremental uploads, the task table and the debugger channel
//!
//! # Examples
//!
//! ```rust
//! use std::sync::Arc;
//! use ilforge::prelude::*;
//!
//! let universe = Universe::with_core_library();
//! let program = universe.define_type("Demo", "Program").build();
//! let main = universe
//!     .define_method(program, "Main")
//!     .attributes(MethodAttributes::STATIC)
//!     .body(MethodBody::new(vec![0x2A], 0))
//!     .build();
//!
//! let mut compiler = Compiler::new(&universe, &[])?;
//! let set = compiler.compile(&universe, main, &CompilerSettings::default())?.set;
//!
//! let device = Arc::new(RecordingTransport::new());
//! let session = Session::new(Arc::clone(&device));
//! let task = session.load(&universe, &set, &LoadOptions::default())?;
//! assert_eq!(task.task_id(), 0);
//! assert!(device.commands().contains(&ExecutorCommand::DeclareMethod));
//! # Ok::<(), ilforge::Error>(())
//! ```

pub mod command;
pub mod encoder;
pub mod flash;
pub mod session;
pub mod transport;

pub use command::{ExecutorCommand, SCHEDULER_DATA};
pub use encoder::PacketWriter;
pub use flash::{FlashHeader, StartupFlags, DATA_VERSION};
pub use session::{LoadOptions, Session, UploadSummary, DEBUGGER_TIMEOUT, DEFAULT_TIMEOUT};
pub use transport::{
    check_ack, debug_reply, task_reply, HardwareInfo, RecordingTransport, Reply, ReplyHandler,
    Transport,
};

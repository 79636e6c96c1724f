//! Chunked Upload Module
//!
//! Reassembles files sent as sequentially numbered chunks and relays them to
//! a transfer sink:
//! - Per-session buffers in memory, on disk, or spilling between the two
//! - Strict in-order appends with idempotent duplicate acknowledgment
//! - Idle expiry, both lazily on append and by a background reaper
//!
//! Protocol Flow:
//! 1. Chunk 0 creates the session and fixes its metadata and chunk count
//! 2. Chunks 1..N-1 append in order
//! 3. The last chunk detaches the buffer and triggers the transfer
//! 4. The session is removed whether the transfer succeeded or failed

pub mod buffer;
pub mod completion;
pub mod reaper;
pub mod receiver;
pub mod session;
pub mod types;

pub use buffer::{
    compute_hash, AssembledContent, AssembledFile, BufferPolicy, ByteStream, StagedChunk,
};
pub use reaper::SessionReaper;
pub use receiver::ChunkReceiver;
pub use session::{SessionLimits, SessionStore};
pub use types::*;

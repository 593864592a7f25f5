//! Inter-process and inter-thread communication primitives.
//!
//! This crate provides the shared-memory audio pipe (Ring Buffer, Shared
//! Memory Region, Named Event, SharedMem Writer — spec §4.1-§4.4), the
//! bounded RT→UI Notification Queue (§4.13), and the non-RT
//! `AudioCommand`/`AudioEvent` channels used to wire the engine to a host
//! application.

pub mod channels;
pub mod named_event;
pub mod notification;
pub mod ring_buffer;
pub mod shared_mem_writer;
pub mod shared_memory;

pub use channels::{
    create_channels, AudioChannels, AudioCommand, AudioEvent, CommandReceiver, CommandSender,
    EventReceiver, EventSender, PluginInstance, UiChannels,
};
pub use named_event::{NamedEvent, NamedEventError, WaitResult};
pub use notification::{Notification, NotificationLevel, NotificationQueue, NOTIFICATION_QUEUE_SIZE};
pub use ring_buffer::{required_region_size, RingBuffer, RingBufferError, HEADER_SIZE};
pub use shared_mem_writer::{SharedMemWriter, SharedMemWriterError};
pub use shared_memory::{to_posix_name, SharedMemoryError, SharedMemoryRegion};

pub use crossbeam_channel;
pub use rtrb;

pub mod capture;
pub mod convert;
pub mod cpal_source;
pub mod delivery;
pub mod detector;
pub mod registry;
pub mod ring_buffer;
pub mod source;
pub mod watchdog;
pub mod wav;

// Public API
pub use capture::{CaptureConfig, CaptureEngine, CaptureStats, CHUNK_FRAMES};
pub use cpal_source::CpalSource;
pub use delivery::{spawn_delivery, DeliveryConfig, RetryPolicy, DELIVERY_CHUNK_BYTES};
pub use detector::ClipDetector;
pub use registry::{ClientInfo, ClientLease, ClientRegistry, ClientSlot};
pub use ring_buffer::{AudioRingBuffer, RingHandle, RingWriter};
pub use source::{MockRead, MockSource, SampleSource, ToneSource};
pub use watchdog::FaultWatchdog;
pub use wav::{streaming_wav_header, WAV_HEADER_LEN};

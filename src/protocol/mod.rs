//! Protocol module - framing, performatives and their codecs.
//!
//! This module implements the AMQP 1.0 wire layer:
//! - 8-byte frame header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - Typed performatives and a described-type registry
//! - Frame encode/decode and message sections

mod frame;
mod frame_buffer;
mod frame_codec;
mod message;
mod performative;
mod registry;
mod wire_format;

pub use frame::{build_frame, build_frame_parts, Frame};
pub use frame_buffer::FrameBuffer;
pub use frame_codec::{encode_frame, performative_frame_size, DecodedFrame, FrameDecoder};
pub use message::{section, MessageBuilder, MessageSections};
pub use performative::{
    descriptor, descriptor_code, outcome, Attach, Begin, Close, Coordinator, DeliveryState,
    Detach, Disposition, End, Flow, Open, Performative, ReceiverSettleMode, Role,
    SenderSettleMode, Source, Target, TargetKind, Transfer, TxnControl, DISTRIBUTION_MODE_COPY,
};
pub use registry::{DecodeFn, DescribedTypeRegistry};
pub use wire_format::{
    decode_header, encode_header, frame_type, validate_header, Header, DEFAULT_MAX_FRAME_SIZE,
    HEADER_SIZE, MIN_DOFF, MIN_MAX_FRAME_SIZE, PROTOCOL_HEADER,
};

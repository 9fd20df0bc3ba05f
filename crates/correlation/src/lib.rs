//! Reception correlation.
//!
//! Every relay that overhears a packet reports its own reception of it. The
//! correlator groups receptions of one message inside a short window, picks
//! the best and the longest one, and keeps one [`DerivedSenderRecord`] per
//! sender.

pub mod correlator;
pub mod error;
pub mod event;
pub mod reception;
pub mod record;
pub mod window;

pub use {
    correlator::{CorrelationKey, Emitted, MessageCacheEntry, ReceptionCorrelator, Resolvers},
    error::{Error, Result},
    event::{
        AdvertisementEvent, ChannelMessageEvent, ContactUpdateEvent, DirectMessageEvent,
        RawEvent, ReceptionEvent,
    },
    reception::{Reception, best_reception, longest_path},
    record::{DataSource, DerivedSenderRecord, MessageType, SensorEntry},
    window::WindowedMap,
};

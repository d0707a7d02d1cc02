//! Event-bus client: one logical real-time connection per page, with
//! client-tracked rooms and typed handlers.

pub mod client;
pub mod events;
pub mod rooms;
pub mod transport;

pub use client::{BusDelivery, EventBusClient, Subscription};
pub use events::{BusEvent, BusEventKind, Frame, ReminderPayload};
pub use rooms::{Room, RoomKind, RoomRegistry};
pub use transport::{BusConnector, BusLink, WsConnector};

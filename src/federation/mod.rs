// 联邦模块
// 出站活动的构造、排队与投递

pub mod activity;
pub mod dispatcher;
pub mod nullable;
pub mod transport;

pub use activity::{Activity, ActivityKind, ActivityObject, LocalUris};
pub use dispatcher::{DispatcherConfig, FederationDispatcher};
pub use nullable::RecordingTransport;
pub use transport::{DeliveryError, DeliveryTransport, HttpTransport};

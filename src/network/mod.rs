//! Network subsystem for UDP audio transport

pub mod receiver;
pub mod sender;
pub mod udp;

pub use receiver::{JitterEstimator, PacketReceiver};
pub use sender::PacketSender;
pub use udp::{bind_receive_socket, create_send_socket};

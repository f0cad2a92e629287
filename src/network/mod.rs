//! Network subsystem for TCP PCM transport

pub mod broadcast;
pub mod client;
pub mod pacer;
pub mod server;
pub mod socket;

pub use broadcast::{ClientRegistry, MicServer, MicServerHandle};
pub use client::{play, receive_loop, ReceiveReport};
pub use pacer::{PaceReport, Pacer};
pub use server::{Playlist, StreamSession, WavServer};
pub use socket::bind_listener;

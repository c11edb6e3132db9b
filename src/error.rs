use std::io;

use thiserror::Error;

/// Errors from opening, using or closing a capture.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("no ifindex for interface `{0}'")]
    NoInterfaceIndex(String),

    #[error("cannot get broadcast address for {0} (bad iftype)")]
    NoBroadcastAddress(String),

    #[error("interface `{0}' not found")]
    InterfaceNotFound(String),

    #[error("cannot create packet socket: {0}")]
    Socket(#[source] io::Error),

    #[error("cannot bind packet socket: {0}")]
    Bind(#[source] io::Error),

    #[error("SO_ATTACH_FILTER: {0}")]
    AttachFilter(#[source] io::Error),

    #[error("cannot read from socket: {0}")]
    Receive(#[source] io::Error),

    #[error("unable to send packet: {0}")]
    Send(#[source] io::Error),

    #[error("payload does not fit in a single datagram")]
    PayloadTooLarge,

    #[error("no capture handle")]
    NotOpen,
}

/// Errors from loading the configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}

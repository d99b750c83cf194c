//! Disconnect cause taxonomy
//!
//! Every connection closure carries exactly one cause, delivered to the
//! handler's `on_disconnected` callback. The error-class subset
//! (`ConnectFailed`, `Error`) drives the manual-unbind reconnect policy.

use core::fmt;
use std::io;

/// Why a connection was closed
#[derive(Debug)]
pub enum DisconnectCause {
    /// Locally requested disconnect (explicit command or watched-handler death)
    Disconnect,

    /// Remote endpoint closed the connection
    Closed,

    /// Closed by the idle sweep
    TimedOut,

    /// Closed because the owning server or worker shut down
    Terminated,

    /// Closed because no handler could take the connection's events
    Unhandled,

    /// Client connect attempt failed before the connection opened
    ConnectFailed(io::Error),

    /// I/O or handler error while the connection was open
    Error(io::Error),
}

impl DisconnectCause {
    /// True for the error-class causes carrying an error payload
    ///
    /// Client handlers with the manual-unbind capability stay bound across
    /// these, so a wrapper can drive reconnection with the same item id.
    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            DisconnectCause::ConnectFailed(_) | DisconnectCause::Error(_)
        )
    }

    /// The error payload, if this is an error-class cause
    pub fn error(&self) -> Option<&io::Error> {
        match self {
            DisconnectCause::ConnectFailed(e) | DisconnectCause::Error(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectCause::Disconnect => write!(f, "disconnected"),
            DisconnectCause::Closed => write!(f, "closed by remote"),
            DisconnectCause::TimedOut => write!(f, "idle timeout"),
            DisconnectCause::Terminated => write!(f, "terminated"),
            DisconnectCause::Unhandled => write!(f, "no handler"),
            DisconnectCause::ConnectFailed(e) => write!(f, "connect failed: {}", e),
            DisconnectCause::Error(e) => write!(f, "error: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_subset() {
        assert!(!DisconnectCause::Disconnect.is_error());
        assert!(!DisconnectCause::Closed.is_error());
        assert!(!DisconnectCause::TimedOut.is_error());
        assert!(!DisconnectCause::Terminated.is_error());
        assert!(!DisconnectCause::Unhandled.is_error());

        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert!(DisconnectCause::ConnectFailed(refused).is_error());

        let broken = io::Error::from(io::ErrorKind::BrokenPipe);
        assert!(DisconnectCause::Error(broken).is_error());
    }

    #[test]
    fn test_error_payload() {
        let cause = DisconnectCause::Error(io::Error::from(io::ErrorKind::BrokenPipe));
        assert_eq!(cause.error().unwrap().kind(), io::ErrorKind::BrokenPipe);
        assert!(DisconnectCause::Closed.error().is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", DisconnectCause::TimedOut), "idle timeout");
        assert_eq!(format!("{}", DisconnectCause::Closed), "closed by remote");
    }
}

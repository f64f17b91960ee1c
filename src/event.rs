//! Events delivered to push subscribers.

use crate::protocol::{PushKind, ServerPush};

/// An event observed by a [`Subscription`](crate::client::Subscription).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// A server push matching the subscription's filter.
    Push(ServerPush),
    /// The connection ended. Always delivered regardless of filter, and always
    /// the last event a subscription yields.
    Disconnected {
        /// Why the connection ended, if known.
        reason: Option<String>,
    },
}

/// Selects which push notifications a subscription receives.
///
/// ```
/// use room_session_client::event::PushFilter;
/// use room_session_client::protocol::PushKind;
///
/// let rooms = PushFilter::only(&[PushKind::RoomCreated, PushKind::RoomJoined]);
/// assert!(rooms.accepts(PushKind::RoomJoined));
/// assert!(!rooms.accepts(PushKind::Error));
/// assert!(PushFilter::all().accepts(PushKind::Error));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushFilter {
    kinds: Option<Vec<PushKind>>,
}

impl PushFilter {
    /// Receive every push notification.
    pub fn all() -> Self {
        Self { kinds: None }
    }

    /// Receive only the listed kinds.
    pub fn only(kinds: &[PushKind]) -> Self {
        Self {
            kinds: Some(kinds.to_vec()),
        }
    }

    /// Returns `true` if pushes of `kind` pass this filter.
    pub fn accepts(&self, kind: PushKind) -> bool {
        self.kinds
            .as_ref()
            .is_none_or(|kinds| kinds.contains(&kind))
    }
}

impl Default for PushFilter {
    fn default() -> Self {
        Self::all()
    }
}

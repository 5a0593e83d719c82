//! Recipient filtering.

use crate::envelope::Recipients;

/// Decide whether the local node accepts a message.
///
/// A broadcast message (no recipients) is always accepted. A targeted
/// message is accepted only when one of its recipients equals one of the
/// local identity values exactly.
pub fn accepts<'a, I>(recipients: &Recipients, identity_values: I) -> bool
where
    I: IntoIterator<Item = &'a str>,
{
    if recipients.is_broadcast() {
        return true;
    }
    identity_values
        .into_iter()
        .any(|value| recipients.iter().any(|recipient| recipient == value))
}

use tokio::sync::watch;
use tracing::info;
use uuid::Uuid;

use crate::model::Identity;

/// Source of the signed-in user. `None` means signed out.
pub trait IdentityProvider: Send + Sync {
    fn current(&self) -> Option<Identity>;
    /// Follows sign-in and sign-out.
    fn watch(&self) -> watch::Receiver<Option<Identity>>;
    fn logout(&self);
}

/// In-process identity for the terminal client and tests.
pub struct LocalIdentity {
    tx: watch::Sender<Option<Identity>>,
}

impl LocalIdentity {
    pub fn new(initial: Option<Identity>) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { tx }
    }

    /// Identity with a uid derived from the display name, stable across
    /// runs.
    pub fn for_name(display_name: &str, email: Option<String>) -> Identity {
        let uid = Uuid::new_v5(&Uuid::NAMESPACE_OID, display_name.trim().as_bytes());
        Identity {
            uid: uid.simple().to_string(),
            display_name: Some(display_name.trim().to_string()),
            email,
        }
    }

    pub fn sign_in(&self, identity: Identity) {
        info!(uid = %identity.uid, "signed in");
        self.tx.send_replace(Some(identity));
    }
}

impl IdentityProvider for LocalIdentity {
    fn current(&self) -> Option<Identity> {
        self.tx.borrow().clone()
    }

    fn watch(&self) -> watch::Receiver<Option<Identity>> {
        self.tx.subscribe()
    }

    fn logout(&self) {
        if self.tx.send_replace(None).is_some() {
            info!("signed out");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uid_is_stable_per_name() {
        let a = LocalIdentity::for_name("Ada", None);
        let b = LocalIdentity::for_name(" Ada ", None);
        let c = LocalIdentity::for_name("Bob", None);
        assert_eq!(a.uid, b.uid);
        assert_ne!(a.uid, c.uid);
        assert_eq!(a.uid.len(), 32);
    }

    #[tokio::test]
    async fn watchers_see_logout() {
        let ids = LocalIdentity::new(Some(Identity::new("u", "U")));
        let mut rx = ids.watch();
        assert!(rx.borrow().is_some());
        ids.logout();
        rx.changed().await.unwrap();
        assert!(rx.borrow().is_none());
        assert!(ids.current().is_none());
    }
}

//! Credential lifecycle: mirroring instance credentials into the transport
//!
//! The security store is the source of truth; the encrypted transport keeps
//! its own tag-indexed credential registry. This module keeps the registry a
//! faithful mirror: every instance holding a credential is registered under
//! exactly one tag, and no tag outlives its instance. A failed registration
//! never rolls the store back; [`CredentialManager::refresh_all`] restores
//! the mirror.

use lwm2m_core::{
    CredentialError, CredentialRegistry, CredentialTag, Endpoint, SecurityInstance, SecurityStore,
};
use tracing::{debug, warn};

use crate::resolver;

/// Credential-selection answer for an encrypted-transport handshake: the tag
/// of the instance configured for the remote endpoint, or the empty tag.
pub fn tag_for_endpoint(store: &SecurityStore, remote: Endpoint) -> CredentialTag {
    resolver::resolve_by_location(store, remote)
        .and_then(|id| store.get(id))
        .and_then(|instance| instance.cred_tag)
        .unwrap_or(CredentialTag::EMPTY)
}

/// Outcome of a full mirror refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub added: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Owns the tag space and drives the transport's credential registry.
pub struct CredentialManager {
    registry: Box<dyn CredentialRegistry>,
    next_tag: u16,
}

impl CredentialManager {
    /// `tag_base` is the first tag handed out; tag 0 stays reserved.
    pub fn new(registry: Box<dyn CredentialRegistry>, tag_base: u16) -> Self {
        Self {
            registry,
            next_tag: tag_base.max(1),
        }
    }

    /// React to an instance being created or its credential replaced.
    ///
    /// Registers the credential under the instance's existing tag, or a
    /// freshly allocated one. On failure the instance keeps no tag and the
    /// error is surfaced; the store itself is untouched.
    pub fn instance_changed(
        &mut self,
        instance: &mut SecurityInstance,
    ) -> Result<(), CredentialError> {
        if !instance.needs_credential() {
            self.instance_removed_tag(instance.cred_tag.take());
            return Ok(());
        }
        let Some(credential) = instance.credential.clone() else {
            self.instance_removed_tag(instance.cred_tag.take());
            return Err(CredentialError::MissingCredential {
                instance: instance.instance_id,
            });
        };

        let tag = match instance.cred_tag {
            Some(tag) => {
                // replacing under the same tag: drop the old entry first
                self.registry.remove(tag);
                tag
            }
            None => self.allocate(),
        };

        match self.registry.add(tag, &credential) {
            Ok(()) => {
                instance.cred_tag = Some(tag);
                debug!(instance = %instance.instance_id, %tag, "credential registered");
                Ok(())
            }
            Err(err) => {
                instance.cred_tag = None;
                warn!(instance = %instance.instance_id, %tag, %err, "credential registration failed");
                Err(err)
            }
        }
    }

    /// React to an instance being deleted.
    pub fn instance_removed(&mut self, instance: &SecurityInstance) {
        self.instance_removed_tag(instance.cred_tag);
    }

    /// Reconcile the transport registry against the store.
    ///
    /// Afterwards the registry holds exactly the tags referenced by
    /// instances with credentials: orphaned tags are pruned and missing
    /// registrations are re-added.
    pub fn refresh_all(&mut self, store: &mut SecurityStore) -> RefreshSummary {
        let mut summary = RefreshSummary::default();

        let referenced: Vec<CredentialTag> = store
            .iter()
            .filter(|i| i.needs_credential() && i.credential.is_some())
            .filter_map(|i| i.cred_tag)
            .collect();
        for tag in self.registry.tags() {
            if !referenced.contains(&tag) {
                self.registry.remove(tag);
                summary.removed += 1;
            }
        }

        let registered = self.registry.tags();
        for instance in store.iter_mut() {
            let credential = match &instance.credential {
                Some(c) if instance.needs_credential() => c.clone(),
                _ => {
                    instance.cred_tag = None;
                    continue;
                }
            };
            let missing = match instance.cred_tag {
                Some(tag) => !registered.contains(&tag),
                None => true,
            };
            if !missing {
                continue;
            }
            let tag = instance.cred_tag.unwrap_or_else(|| self.allocate());
            match self.registry.add(tag, &credential) {
                Ok(()) => {
                    instance.cred_tag = Some(tag);
                    summary.added += 1;
                }
                Err(err) => {
                    instance.cred_tag = None;
                    summary.failed += 1;
                    warn!(instance = %instance.instance_id, %tag, %err, "refresh could not register credential");
                }
            }
        }
        summary
    }

    /// Tag to hand the encrypted transport on connect.
    pub fn select_tag(&self, instance: &SecurityInstance) -> CredentialTag {
        instance.cred_tag.unwrap_or(CredentialTag::EMPTY)
    }

    fn instance_removed_tag(&mut self, tag: Option<CredentialTag>) {
        if let Some(tag) = tag {
            self.registry.remove(tag);
            debug!(%tag, "credential released");
        }
    }

    fn allocate(&mut self) -> CredentialTag {
        let tag = CredentialTag::new(self.next_tag);
        self.next_tag = self.next_tag.checked_add(1).unwrap_or(1);
        tag
    }
}

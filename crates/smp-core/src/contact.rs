//! Contact store.
//!
//! A fixed table of [`MAX_CONTACTS`] slots. Each active slot owns a queue
//! created with `NEW` on our server with its own keys; contacts never share
//! keys with the reply queue. A free slot is any inactive entry.

use crate::connection::SmpConnection;
use crate::error::{QueueError, Result};
use crate::queue::QueueRecord;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Contact table capacity
pub const MAX_CONTACTS: usize = 10;

/// Persisted table format version
pub const CONTACT_TABLE_VERSION: u32 = 1;

/// One contact slot
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ContactRecord {
    /// Contact name
    pub name: String,
    /// Queue created for this contact
    pub queue: Option<QueueRecord>,
    /// Whether the slot is in use
    pub active: bool,
}

impl ContactRecord {
    fn clear(&mut self) {
        self.name.zeroize();
        if let Some(queue) = self.queue.as_mut() {
            queue.zeroize();
        }
        *self = Self::default();
    }
}

impl std::fmt::Debug for ContactRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContactRecord")
            .field("name", &self.name)
            .field("active", &self.active)
            .field("queue", &self.queue)
            .finish()
    }
}

/// Serialized form of the contact store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactTable {
    /// Format version
    pub version: u32,
    /// Slots, at most [`MAX_CONTACTS`]
    pub contacts: Vec<ContactRecord>,
}

/// In-memory contact table
#[derive(Debug, Clone)]
pub struct ContactStore {
    slots: Vec<ContactRecord>,
    num_contacts: usize,
}

impl Default for ContactStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ContactStore {
    /// Empty table
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: vec![ContactRecord::default(); MAX_CONTACTS],
            num_contacts: 0,
        }
    }

    /// Restore from a persisted table. Extra slots beyond capacity and
    /// inactive entries are dropped.
    #[must_use]
    pub fn from_table(table: ContactTable) -> Self {
        let mut store = Self::new();
        for record in table.contacts.into_iter().filter(|r| r.active && r.queue.is_some()) {
            if store.num_contacts == MAX_CONTACTS {
                tracing::warn!("Contact table exceeds {} slots, dropping extra", MAX_CONTACTS);
                break;
            }
            store.slots[store.num_contacts] = record;
            store.num_contacts += 1;
        }
        store
    }

    /// Persistable snapshot
    #[must_use]
    pub fn to_table(&self) -> ContactTable {
        ContactTable {
            version: CONTACT_TABLE_VERSION,
            contacts: self.slots.clone(),
        }
    }

    /// Number of active contacts
    #[must_use]
    pub fn num_contacts(&self) -> usize {
        self.num_contacts
    }

    /// Active contacts in slot order
    pub fn active(&self) -> impl Iterator<Item = &ContactRecord> {
        self.slots.iter().filter(|slot| slot.active)
    }

    /// Look up an active contact by name
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&ContactRecord> {
        self.active().find(|slot| slot.name == name)
    }

    /// Store a contact in the first free slot and return its index.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::CapacityExceeded`] when every slot is active.
    pub fn insert(&mut self, name: &str, queue: QueueRecord) -> Result<usize> {
        let index = self
            .slots
            .iter()
            .position(|slot| !slot.active)
            .ok_or(QueueError::CapacityExceeded(MAX_CONTACTS))?;
        self.slots[index] = ContactRecord {
            name: name.to_string(),
            queue: Some(queue),
            active: true,
        };
        self.num_contacts += 1;
        Ok(index)
    }

    /// Zero and free the slot of `name`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::NotFound`] if no active contact has that name.
    pub fn clear(&mut self, name: &str) -> Result<()> {
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.active && slot.name == name)
            .ok_or_else(|| QueueError::NotFound(name.to_string()))?;
        slot.clear();
        self.num_contacts -= 1;
        Ok(())
    }

    /// Zero every slot
    pub fn clear_all(&mut self) {
        for slot in &mut self.slots {
            slot.clear();
        }
        self.num_contacts = 0;
    }

    /// Create a queue for a new contact with `NEW` and store it.
    ///
    /// # Errors
    ///
    /// - [`QueueError::CapacityExceeded`] if the table is full (checked before `NEW`)
    /// - queue creation errors
    pub async fn add_contact(&mut self, conn: &mut SmpConnection, name: &str) -> Result<usize> {
        if self.num_contacts >= MAX_CONTACTS {
            return Err(QueueError::CapacityExceeded(MAX_CONTACTS).into());
        }
        let queue = QueueRecord::create(conn).await?;
        let index = self.insert(name, queue)?;
        tracing::info!("Added contact {:?} in slot {}", name, index);
        Ok(index)
    }

    /// Delete the contact's queue with `DEL` and zero its slot.
    ///
    /// # Errors
    ///
    /// - [`QueueError::NotFound`] for an unknown name
    /// - `DEL` errors; the slot is kept in that case
    pub async fn remove_contact(&mut self, conn: &mut SmpConnection, name: &str) -> Result<()> {
        let record = self
            .find(name)
            .ok_or_else(|| QueueError::NotFound(name.to_string()))?;
        if let Some(queue) = &record.queue {
            queue.delete(conn).await?;
        }
        self.clear(name)?;
        tracing::info!("Removed contact {:?}", name);
        Ok(())
    }

    /// Subscribe every active contact queue on this connection's server,
    /// plus the reply queue. Failures are logged and skipped.
    ///
    /// Returns the number of successful subscriptions.
    pub async fn subscribe_all(
        &self,
        conn: &mut SmpConnection,
        reply_queue: Option<&QueueRecord>,
    ) -> usize {
        let mut subscribed = 0;
        let contact_queues = self
            .active()
            .filter_map(|contact| contact.queue.as_ref().map(|q| (contact.name.as_str(), q)));
        let reply = reply_queue.map(|q| ("reply queue", q));

        for (label, queue) in contact_queues.chain(reply) {
            if queue.server_host != conn.host() || queue.server_port != conn.port() {
                tracing::warn!(
                    "Skipping {:?}: queue lives on {}:{}",
                    label,
                    queue.server_host,
                    queue.server_port
                );
                continue;
            }
            match queue.subscribe(conn).await {
                Ok(()) => subscribed += 1,
                Err(e) => tracing::warn!("Subscribe failed for {:?}: {}", label, e),
            }
        }
        tracing::debug!("Subscribed {} queues", subscribed);
        subscribed
    }
}

//! Unsettled delivery-tag tracking for one link.
//!
//! A tag may not be reused while a delivery carrying it is unsettled on
//! the link. Once that delivery settles the tag is free again.

use std::collections::HashMap;

use bytes::Bytes;

use crate::error::{AmqpError, ErrorCondition};

/// Unsettled deliveries of a link, indexed both ways.
#[derive(Debug, Default)]
pub struct UnsettledDeliveries {
    by_tag: HashMap<Bytes, u32>,
    by_id: HashMap<u32, Bytes>,
}

impl UnsettledDeliveries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an unsettled delivery. Fails if `tag` is already unsettled.
    pub fn insert(&mut self, tag: Bytes, delivery_id: u32) -> Result<(), AmqpError> {
        if self.by_tag.contains_key(&tag) {
            return Err(AmqpError::new(
                ErrorCondition::IllegalState,
                format!("delivery-tag {tag:?} is already in use by an unsettled delivery"),
            ));
        }
        self.by_tag.insert(tag.clone(), delivery_id);
        self.by_id.insert(delivery_id, tag);
        Ok(())
    }

    pub fn contains_tag(&self, tag: &[u8]) -> bool {
        self.by_tag.contains_key(tag)
    }

    pub fn contains_id(&self, delivery_id: u32) -> bool {
        self.by_id.contains_key(&delivery_id)
    }

    /// Forget a delivery, freeing its tag. Returns the tag if it was held.
    pub fn settle(&mut self, delivery_id: u32) -> Option<Bytes> {
        let tag = self.by_id.remove(&delivery_id)?;
        self.by_tag.remove(&tag);
        Some(tag)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Delivery ids, in ascending order.
    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.by_id.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn clear(&mut self) {
        self.by_tag.clear();
        self.by_id.clear();
    }
}

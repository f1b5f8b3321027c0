use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;

use crate::engine::EngineError;
use crate::limits::MAX_TEXT_LEN;
use crate::model::*;

use super::BookingSource;

/// On-disk export of reservations and blocks, as produced by a booking import.
#[derive(Debug, Default, Deserialize)]
pub struct BookingSnapshot {
    #[serde(default)]
    pub reservations: Vec<Reservation>,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

fn check_id(kind: &str, id: &str, property_id: &str) -> Result<(), EngineError> {
    if id.is_empty() || property_id.is_empty() {
        return Err(EngineError::InvalidRecord(format!("{kind} needs an id and a propertyId")));
    }
    if id.len() > MAX_TEXT_LEN || property_id.len() > MAX_TEXT_LEN {
        return Err(EngineError::LimitExceeded("text field too long"));
    }
    Ok(())
}

/// In-memory booking source keyed by property. Records are validated on the way in.
#[derive(Default)]
pub struct MemoryBookings {
    reservations: DashMap<String, Vec<Reservation>>,
    blocks: DashMap<String, Vec<Block>>,
}

impl MemoryBookings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: BookingSnapshot) -> Result<Self, EngineError> {
        let source = Self::new();
        for r in snapshot.reservations {
            source.insert_reservation(r)?;
        }
        for b in snapshot.blocks {
            source.insert_block(b)?;
        }
        Ok(source)
    }

    pub fn load_json(path: &Path) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Transport(format!("read {}: {e}", path.display())))?;
        let snapshot: BookingSnapshot = serde_json::from_str(&raw)
            .map_err(|e| EngineError::InvalidRecord(format!("bookings snapshot: {e}")))?;
        Self::from_snapshot(snapshot)
    }

    /// Rejects a stay whose check-out is not after its check-in.
    pub fn insert_reservation(&self, reservation: Reservation) -> Result<(), EngineError> {
        check_id("reservation", &reservation.id, &reservation.property_id)?;
        if reservation.check_out <= reservation.check_in {
            return Err(EngineError::InvalidRange {
                start: reservation.check_in,
                end: reservation.check_out,
            });
        }
        self.reservations
            .entry(reservation.property_id.clone())
            .or_default()
            .push(reservation);
        Ok(())
    }

    pub fn insert_block(&self, block: Block) -> Result<(), EngineError> {
        check_id("block", &block.id, &block.property_id)?;
        DateRange::new(block.start_date, block.end_date)?;
        self.blocks.entry(block.property_id.clone()).or_default().push(block);
        Ok(())
    }

    /// Every property that has at least one reservation or block, sorted.
    pub fn property_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .reservations
            .iter()
            .map(|e| e.key().clone())
            .chain(self.blocks.iter().map(|e| e.key().clone()))
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    fn collect<T: Clone>(map: &DashMap<String, Vec<T>>, property_id: Option<&str>) -> Vec<T> {
        match property_id {
            Some(pid) => map.get(pid).map(|e| e.value().clone()).unwrap_or_default(),
            None => map.iter().flat_map(|e| e.value().clone()).collect(),
        }
    }
}

#[async_trait]
impl BookingSource for MemoryBookings {
    async fn reservations_for(&self, property_id: Option<&str>) -> Result<Vec<Reservation>, EngineError> {
        Ok(Self::collect(&self.reservations, property_id))
    }

    async fn blocks_for(&self, property_id: Option<&str>) -> Result<Vec<Block>, EngineError> {
        Ok(Self::collect(&self.blocks, property_id))
    }
}

use crate::error::Violation;
use crate::util::Interval;
use crate::{VehicleId, VehicleSet};
use itertools::Itertools;

/// A single lane of a road segment, holding its vehicles ordered from the
/// front of the lane to the back.
#[derive(Clone, Debug, Default)]
pub struct Lane {
    /// The vehicles on the lane, leader first.
    vehicles: Vec<VehicleId>,
}

impl Lane {
    /// The vehicles on the lane, ordered by descending front position.
    pub fn vehicles(&self) -> &[VehicleId] {
        &self.vehicles
    }

    /// The number of vehicles on the lane.
    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    /// Whether the lane has no vehicles.
    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    /// The vehicle furthest along the lane.
    pub fn first(&self) -> Option<VehicleId> {
        self.vehicles.first().copied()
    }

    /// The vehicle nearest the start of the lane.
    pub fn last(&self) -> Option<VehicleId> {
        self.vehicles.last().copied()
    }

    /// The index of the vehicle on the lane, if it is on the lane.
    pub fn index_of(&self, id: VehicleId) -> Option<usize> {
        self.vehicles.iter().position(|v| *v == id)
    }

    /// The vehicle directly ahead of the given vehicle.
    pub fn leader_of(&self, id: VehicleId) -> Option<VehicleId> {
        let idx = self.index_of(id)?;
        idx.checked_sub(1).map(|idx| self.vehicles[idx])
    }

    /// The vehicle directly behind the given vehicle.
    pub fn follower_of(&self, id: VehicleId) -> Option<VehicleId> {
        let idx = self.index_of(id)?;
        self.vehicles.get(idx + 1).copied()
    }

    /// The vehicles whose front lies within `[begin, end]`, leader first.
    pub(crate) fn vehicles_in_range<'a>(
        &'a self,
        vehicles: &'a VehicleSet,
        begin: f64,
        end: f64,
    ) -> impl Iterator<Item = VehicleId> + 'a {
        let range = Interval::new(begin, end);
        self.vehicles
            .iter()
            .copied()
            .skip_while(move |id| vehicles[*id].pos_front() > range.max)
            .take_while(move |id| vehicles[*id].pos_front() >= range.min)
    }

    /// The index at which a vehicle with its front at `pos` would be inserted.
    /// Vehicles level with `pos` stay ahead of it.
    pub(crate) fn insertion_index(&self, vehicles: &VehicleSet, pos: f64) -> usize {
        self.vehicles
            .iter()
            .position(|id| vehicles[*id].pos_front() < pos)
            .unwrap_or(self.vehicles.len())
    }

    /// The vehicles which would be directly ahead of and behind a vehicle
    /// with its front at `pos`.
    pub(crate) fn neighbours_at(
        &self,
        vehicles: &VehicleSet,
        pos: f64,
    ) -> (Option<VehicleId>, Option<VehicleId>) {
        let idx = self.insertion_index(vehicles, pos);
        let ahead = idx.checked_sub(1).map(|idx| self.vehicles[idx]);
        let behind = self.vehicles.get(idx).copied();
        (ahead, behind)
    }

    /// Inserts the vehicle with the given ID into the lane.
    pub(crate) fn insert(&mut self, vehicles: &VehicleSet, id: VehicleId) {
        let idx = self.insertion_index(vehicles, vehicles[id].pos_front());
        self.vehicles.insert(idx, id);
    }

    /// Removes the vehicle with the given ID from the lane.
    pub(crate) fn remove(&mut self, id: VehicleId) -> Result<(), Violation> {
        let idx = self.index_of(id).ok_or(Violation::MissingVehicle(id))?;
        self.vehicles.remove(idx);
        Ok(())
    }

    /// Checks that the vehicles are ordered and that no vehicle overlaps
    /// its leader by more than `jam_distance`.
    pub(crate) fn check_order(&self, vehicles: &VehicleSet, jam_distance: f64) -> Result<(), Violation> {
        for (leader, follower) in self.vehicles.iter().tuple_windows() {
            let (lead, follow) = (&vehicles[*leader], &vehicles[*follower]);
            if follow.pos_front() > lead.pos_front() {
                return Err(Violation::OutOfOrder {
                    leader: *leader,
                    follower: *follower,
                });
            }
            let gap = lead.pos_rear() - follow.pos_front();
            if gap < -jam_distance {
                return Err(Violation::Overlap {
                    leader: *leader,
                    follower: *follower,
                    gap,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::vehicle::{Vehicle, VehicleType};
    use crate::SegmentId;
    use slotmap::KeyData;
    use std::sync::Arc;

    fn setup(positions: &[f64]) -> (VehicleSet, Lane, Vec<VehicleId>) {
        let segment = SegmentId::from(KeyData::from_ffi(1));
        let kind = Arc::new(VehicleType::default());
        let mut vehicles = VehicleSet::default();
        let mut lane = Lane::default();
        let ids = positions
            .iter()
            .enumerate()
            .map(|(n, pos)| {
                let id = vehicles.insert_with_key(|id| {
                    Vehicle::new(id, n as u64, kind.clone(), segment, 0, *pos, 10.0)
                });
                lane.insert(&vehicles, id);
                id
            })
            .collect();
        (vehicles, lane, ids)
    }

    #[test]
    fn insert_keeps_leader_first() {
        let (vehicles, lane, ids) = setup(&[20.0, 60.0, 40.0, 0.0]);
        assert_eq!(lane.vehicles(), &[ids[1], ids[2], ids[0], ids[3]]);
        assert!(lane.check_order(&vehicles, 0.0).is_ok());
    }

    #[test]
    fn leader_and_follower() {
        let (_, lane, ids) = setup(&[20.0, 60.0, 40.0]);
        assert_eq!(lane.leader_of(ids[2]), Some(ids[1]));
        assert_eq!(lane.follower_of(ids[2]), Some(ids[0]));
        assert_eq!(lane.leader_of(ids[1]), None);
        assert_eq!(lane.follower_of(ids[0]), None);
    }

    #[test]
    fn range_is_inclusive_on_front() {
        let (vehicles, lane, ids) = setup(&[20.0, 60.0, 40.0, 0.0]);
        let found = lane.vehicles_in_range(&vehicles, 20.0, 40.0).collect::<Vec<_>>();
        assert_eq!(found, vec![ids[2], ids[0]]);
        assert_eq!(lane.vehicles_in_range(&vehicles, 61.0, 100.0).count(), 0);
        assert_eq!(lane.vehicles_in_range(&vehicles, -1.0, 100.0).count(), 4);
    }

    #[test]
    fn remove_missing_vehicle_fails() {
        let (_, mut lane, ids) = setup(&[20.0, 60.0]);
        assert!(lane.remove(ids[0]).is_ok());
        assert_eq!(lane.remove(ids[0]), Err(Violation::MissingVehicle(ids[0])));
        assert_eq!(lane.len(), 1);
    }

    #[test]
    fn detects_overlap() {
        // Fronts 3 m apart with 5 m long vehicles
        let (vehicles, lane, ids) = setup(&[10.0, 13.0]);
        assert!(matches!(
            lane.check_order(&vehicles, 0.0),
            Err(Violation::Overlap { leader, follower, .. }) if leader == ids[1] && follower == ids[0]
        ));
    }

    #[test]
    fn neighbours_at_position() {
        let (vehicles, lane, ids) = setup(&[20.0, 60.0]);
        assert_eq!(lane.neighbours_at(&vehicles, 40.0), (Some(ids[1]), Some(ids[0])));
        assert_eq!(lane.neighbours_at(&vehicles, 70.0), (None, Some(ids[1])));
        assert_eq!(lane.neighbours_at(&vehicles, 10.0), (Some(ids[0]), None));
    }
}

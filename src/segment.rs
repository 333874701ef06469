use crate::error::{positive, SimError};
use crate::lane::Lane;
use crate::{SegmentId, TrafficLightId};
use smallvec::SmallVec;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A one-way stretch of road made up of parallel lanes.
#[derive(Clone, Debug)]
pub struct RoadSegment {
    /// The segment ID.
    id: SegmentId,
    /// The length of the segment in m.
    length: f64,
    /// The lanes, rightmost first.
    lanes: Vec<Lane>,
    /// Speed limit in m/s.
    speed_limit: Option<f64>,
    /// The road gradient, as rise over run.
    gradient: Option<f64>,
    /// The connections to downstream segments.
    links_out: SmallVec<[Connection; 4]>,
    /// The segments which connect into this one.
    links_in: SmallVec<[SegmentId; 4]>,
    /// The traffic lights on the segment, ordered by position.
    lights: SmallVec<[(f64, TrafficLightId); 2]>,
}

/// The attributes of a road segment.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SegmentAttributes {
    /// The length of the segment in m.
    pub length: f64,
    /// The number of lanes.
    pub lanes: usize,
    /// The speed limit in m/s, if any.
    pub speed_limit: Option<f64>,
    /// The road gradient, if known.
    pub gradient: Option<f64>,
}

/// Joins a lane at the end of one segment to a lane at the start of another.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Connection {
    /// The lane on the upstream segment.
    pub from_lane: usize,
    /// The downstream segment.
    pub to_segment: SegmentId,
    /// The lane on the downstream segment.
    pub to_lane: usize,
}

impl SegmentAttributes {
    /// Attributes for a segment with no speed limit or gradient.
    pub fn new(length: f64, lanes: usize) -> Self {
        Self {
            length,
            lanes,
            speed_limit: None,
            gradient: None,
        }
    }

    /// Checks the attributes describe a usable segment.
    pub fn validate(&self) -> Result<(), SimError> {
        positive("road segment", "length", self.length)?;
        if self.lanes == 0 {
            return Err(SimError::invalid("road segment", "lanes", "must have at least one lane"));
        }
        if let Some(limit) = self.speed_limit {
            positive("road segment", "speed_limit", limit)?;
        }
        if self.gradient.map_or(false, |g| !g.is_finite()) {
            return Err(SimError::invalid("road segment", "gradient", "must be finite"));
        }
        Ok(())
    }
}

impl RoadSegment {
    /// Creates a new segment.
    pub(crate) fn new(id: SegmentId, attribs: &SegmentAttributes) -> Self {
        Self {
            id,
            length: attribs.length,
            lanes: vec![Lane::default(); attribs.lanes],
            speed_limit: attribs.speed_limit,
            gradient: attribs.gradient,
            links_out: SmallVec::new(),
            links_in: SmallVec::new(),
            lights: SmallVec::new(),
        }
    }

    /// Gets the segment's ID.
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Gets the length of the segment in m.
    pub fn length(&self) -> f64 {
        self.length
    }

    /// The lanes of the segment, rightmost first.
    pub fn lanes(&self) -> &[Lane] {
        &self.lanes
    }

    /// Gets a lane by its index.
    pub fn lane(&self, idx: usize) -> Option<&Lane> {
        self.lanes.get(idx)
    }

    pub(crate) fn lane_mut(&mut self, idx: usize) -> Option<&mut Lane> {
        self.lanes.get_mut(idx)
    }

    /// The number of lanes.
    pub fn num_lanes(&self) -> usize {
        self.lanes.len()
    }

    /// The lane to the right of `lane`, if there is one.
    pub fn right_of(&self, lane: usize) -> Option<usize> {
        lane.checked_sub(1)
    }

    /// The lane to the left of `lane`, if there is one.
    pub fn left_of(&self, lane: usize) -> Option<usize> {
        Some(lane + 1).filter(|idx| *idx < self.lanes.len())
    }

    /// The speed limit in m/s, if any.
    pub fn speed_limit(&self) -> Option<f64> {
        self.speed_limit
    }

    /// The road gradient, if known.
    pub fn gradient(&self) -> Option<f64> {
        self.gradient
    }

    /// The connections to downstream segments.
    pub fn connections(&self) -> &[Connection] {
        &self.links_out
    }

    /// The segments which connect into this one.
    pub fn predecessors(&self) -> &[SegmentId] {
        &self.links_in
    }

    /// Whether vehicles leave the network at the end of this segment.
    pub fn is_sink(&self) -> bool {
        self.links_out.is_empty()
    }

    /// The IDs of the traffic lights on the segment, ordered by position.
    pub fn lights(&self) -> impl Iterator<Item = TrafficLightId> + '_ {
        self.lights.iter().map(|(_, id)| *id)
    }

    /// The speed limit, or infinity if the segment has none.
    pub(crate) fn speed_limit_or_inf(&self) -> f64 {
        self.speed_limit.unwrap_or(f64::INFINITY)
    }

    /// The first traffic light at or beyond `pos`.
    pub(crate) fn light_ahead(&self, pos: f64) -> Option<TrafficLightId> {
        self.lights
            .iter()
            .find(|(light_pos, _)| *light_pos >= pos)
            .map(|(_, id)| *id)
    }

    /// The connection a vehicle on `lane` takes at the end of the segment.
    /// Vehicles heading for `next` use a connection to it; others use the
    /// first connection from their lane.
    pub(crate) fn connection_for(&self, lane: usize, next: Option<SegmentId>) -> Option<Connection> {
        let mut connections = self.links_out.iter().filter(|c| c.from_lane == lane);
        match next {
            Some(next) => connections.find(|c| c.to_segment == next),
            None => connections.next(),
        }
        .copied()
    }

    /// Whether a vehicle on `lane` heading for `next` is unable to leave
    /// the segment.
    pub(crate) fn is_dead_end(&self, lane: usize, next: Option<SegmentId>) -> bool {
        !self.is_sink() && self.connection_for(lane, next).is_none()
    }

    /// Whether any lane of this segment connects to `to`.
    pub(crate) fn connects_to(&self, to: SegmentId) -> bool {
        self.links_out.iter().any(|c| c.to_segment == to)
    }

    pub(crate) fn add_connection(&mut self, connection: Connection) {
        if !self.links_out.contains(&connection) {
            self.links_out.push(connection);
        }
    }

    pub(crate) fn add_predecessor(&mut self, segment: SegmentId) {
        if !self.links_in.contains(&segment) {
            self.links_in.push(segment);
        }
    }

    pub(crate) fn add_light(&mut self, pos: f64, id: TrafficLightId) {
        let idx = self
            .lights
            .iter()
            .position(|(light_pos, _)| *light_pos > pos)
            .unwrap_or(self.lights.len());
        self.lights.insert(idx, (pos, id));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use slotmap::KeyData;

    fn segment(lanes: usize) -> RoadSegment {
        let id = SegmentId::from(KeyData::from_ffi(1));
        RoadSegment::new(id, &SegmentAttributes::new(100.0, lanes))
    }

    #[test]
    fn lane_neighbours() {
        let segment = segment(3);
        assert_eq!(segment.right_of(0), None);
        assert_eq!(segment.right_of(2), Some(1));
        assert_eq!(segment.left_of(1), Some(2));
        assert_eq!(segment.left_of(2), None);
    }

    #[test]
    fn rejects_bad_attributes() {
        assert!(SegmentAttributes::new(0.0, 1).validate().is_err());
        assert!(SegmentAttributes::new(10.0, 0).validate().is_err());
        let attribs = SegmentAttributes {
            speed_limit: Some(-5.0),
            ..SegmentAttributes::new(10.0, 1)
        };
        assert!(attribs.validate().is_err());
    }

    #[test]
    fn connection_follows_route() {
        let mut segment = segment(2);
        let a = SegmentId::from(KeyData::from_ffi(2));
        let b = SegmentId::from(KeyData::from_ffi(3));
        assert!(segment.is_sink());
        segment.add_connection(Connection { from_lane: 0, to_segment: a, to_lane: 0 });
        segment.add_connection(Connection { from_lane: 0, to_segment: b, to_lane: 1 });
        assert!(!segment.is_sink());
        assert_eq!(segment.connection_for(0, None).map(|c| c.to_segment), Some(a));
        assert_eq!(segment.connection_for(0, Some(b)).map(|c| c.to_lane), Some(1));
        assert!(segment.is_dead_end(1, None));
        assert!(!segment.is_dead_end(0, Some(a)));
    }

    #[test]
    fn lights_are_ordered() {
        let mut segment = segment(1);
        let near = TrafficLightId::from(KeyData::from_ffi(1));
        let far = TrafficLightId::from(KeyData::from_ffi(2));
        segment.add_light(80.0, far);
        segment.add_light(20.0, near);
        assert_eq!(segment.lights().collect::<Vec<_>>(), vec![near, far]);
        assert_eq!(segment.light_ahead(20.0), Some(near));
        assert_eq!(segment.light_ahead(21.0), Some(far));
        assert_eq!(segment.light_ahead(81.0), None);
    }
}

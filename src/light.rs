use crate::link::LinkState;
use crate::{LinkId, SimError, SimResult};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// One phase of a fixed-time signal program.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Phase {
    /// The duration of the phase in s.
    pub duration: f64,
    /// The state of each controlled link, in the order the links were given.
    pub states: Vec<LinkState>,
}

impl Phase {
    pub fn new(duration: f64, states: Vec<LinkState>) -> Self {
        Self { duration, states }
    }
}

/// A fixed-time traffic light which cycles through its phases and sets
/// the states of the links it controls.
#[derive(Clone, Debug)]
pub struct TrafficLight {
    name: String,
    /// The controlled links.
    links: Vec<LinkId>,
    phases: Vec<Phase>,
    /// The length of one cycle in s.
    cycle: f64,
    /// Shifts the program start, in s.
    offset: f64,
    /// The index of the current phase.
    current: usize,
}

impl TrafficLight {
    /// Creates a traffic light controlling `links` with the given program.
    pub fn new(name: &str, links: Vec<LinkId>, phases: Vec<Phase>, offset: f64) -> SimResult<Self> {
        if phases.is_empty() {
            return Err(SimError::InvalidParameter(format!(
                "traffic light '{}' has no phases",
                name
            )));
        }
        for (idx, phase) in phases.iter().enumerate() {
            if !(phase.duration > 0.0) {
                return Err(SimError::InvalidParameter(format!(
                    "traffic light '{}': phase {} has duration {}",
                    name, idx, phase.duration
                )));
            }
            if phase.states.len() != links.len() {
                return Err(SimError::InvalidParameter(format!(
                    "traffic light '{}': phase {} has {} states for {} links",
                    name,
                    idx,
                    phase.states.len(),
                    links.len()
                )));
            }
        }
        let cycle = phases.iter().map(|p| p.duration).sum();
        Ok(Self {
            name: name.to_owned(),
            links,
            phases,
            cycle,
            offset,
            current: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn links(&self) -> &[LinkId] {
        &self.links
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    /// The index of the phase active at `time`.
    pub fn phase_at(&self, time: f64) -> usize {
        let mut t = (time - self.offset).rem_euclid(self.cycle);
        for (idx, phase) in self.phases.iter().enumerate() {
            if t < phase.duration {
                return idx;
            }
            t -= phase.duration;
        }
        self.phases.len() - 1
    }

    /// Advances the program to `now`.
    pub fn update(&mut self, now: f64) {
        self.current = self.phase_at(now);
    }

    /// The index of the current phase.
    pub fn current_phase(&self) -> usize {
        self.current
    }

    /// The current state of every controlled link.
    pub fn states(&self) -> impl Iterator<Item = (LinkId, LinkState)> + '_ {
        self.links
            .iter()
            .copied()
            .zip(self.phases[self.current].states.iter().copied())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use slotmap::SlotMap;

    fn two_links() -> Vec<LinkId> {
        let mut links = SlotMap::<LinkId, ()>::with_key();
        vec![links.insert(()), links.insert(())]
    }

    #[test]
    fn cycles_through_phases() {
        use LinkState::*;
        let phases = vec![
            Phase::new(30.0, vec![GreenMajor, Red]),
            Phase::new(3.0, vec![YellowMajor, Red]),
            Phase::new(27.0, vec![Red, GreenMajor]),
        ];
        let mut light = TrafficLight::new("tl", two_links(), phases, 0.0).unwrap();
        assert_eq!(light.phase_at(0.0), 0);
        assert_eq!(light.phase_at(31.0), 1);
        assert_eq!(light.phase_at(40.0), 2);
        assert_eq!(light.phase_at(61.0), 0);
        light.update(45.0);
        let states = light.states().map(|(_, s)| s).collect::<Vec<_>>();
        assert_eq!(states, vec![Red, GreenMajor]);
    }

    #[test]
    fn offset_shifts_program() {
        use LinkState::*;
        let phases = vec![
            Phase::new(10.0, vec![GreenMajor, Red]),
            Phase::new(10.0, vec![Red, GreenMajor]),
        ];
        let light = TrafficLight::new("tl", two_links(), phases, 5.0).unwrap();
        assert_eq!(light.phase_at(0.0), 1);
        assert_eq!(light.phase_at(5.0), 0);
    }

    #[test]
    fn rejects_bad_programs() {
        let links = two_links();
        assert!(TrafficLight::new("tl", links.clone(), vec![], 0.0).is_err());
        let short = vec![Phase::new(10.0, vec![LinkState::Red])];
        assert!(TrafficLight::new("tl", links.clone(), short, 0.0).is_err());
        let zero = vec![Phase::new(0.0, vec![LinkState::Red; 2])];
        assert!(TrafficLight::new("tl", links, zero, 0.0).is_err());
    }
}

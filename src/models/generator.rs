//! Generator model: per-tick power output from a time-indexed profile.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::error::SimError;
use crate::sim::adapter::{Adapter, Model};
use crate::sim::clock::Clock;
use crate::sim::manifest::ModelDescriptor;
use crate::sim::types::{AttrValue, EntityInputs, SimTime};

use super::profile::PowerProfile;

/// Generator simulator adapter.
pub type GeneratorSim = Adapter<Generator>;

/// Adapter-level generator configuration.
#[derive(Clone)]
pub struct GeneratorConfig {
    /// Profile shared by every generator entity of the adapter.
    pub profile: Arc<dyn PowerProfile>,
}

impl GeneratorConfig {
    pub fn new(profile: Arc<dyn PowerProfile>) -> Self {
        Self { profile }
    }
}

impl fmt::Debug for GeneratorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorConfig").finish_non_exhaustive()
    }
}

/// Shared generator context.
pub struct GeneratorContext {
    clock: Clock,
    profile: Arc<dyn PowerProfile>,
}

/// A generator entity exposing its current power as attribute `p`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Generator {
    p: Option<f64>,
}

impl Generator {
    /// Power computed at the last step, `None` before the first step.
    pub fn p(&self) -> Option<f64> {
        self.p
    }
}

impl Model for Generator {
    type Config = GeneratorConfig;
    type Context = GeneratorContext;
    type Params = ();

    const DESCRIPTOR: ModelDescriptor = ModelDescriptor {
        kind: "Generator",
        public: true,
        params: &[],
        attrs: &["p"],
        any_inputs: false,
    };

    fn context(clock: Clock, config: GeneratorConfig) -> Result<GeneratorContext, SimError> {
        Ok(GeneratorContext {
            clock,
            profile: config.profile,
        })
    }

    fn create(_context: &mut GeneratorContext, _eid: &str, _params: ()) -> Result<Self, SimError> {
        Ok(Self::default())
    }

    fn step(
        &mut self,
        context: &GeneratorContext,
        time: SimTime,
        _inputs: &EntityInputs,
    ) -> Result<(), SimError> {
        let dt = context.clock.to_datetime(time)?;
        let p = context.profile.power_at(dt);
        trace!(time, %dt, p, "generator output");
        self.p = Some(p);
        Ok(())
    }

    fn get(&self, attr: &str) -> Option<AttrValue> {
        match attr {
            "p" => self.p.map(AttrValue::from),
            _ => None,
        }
    }

    fn next_step(
        &self,
        context: &GeneratorContext,
        time: SimTime,
    ) -> Result<Option<SimTime>, SimError> {
        let dt = context.clock.to_datetime(time)?;
        context
            .profile
            .next_update(dt)
            .map(|next| context.clock.to_simtime(next))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime};

    use super::*;
    use crate::models::profile::{SolarProfile, TimeSeriesProfile};
    use crate::sim::types::Inputs;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 6, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    fn generator(profile: Arc<dyn PowerProfile>) -> GeneratorSim {
        let mut sim = GeneratorSim::new("gen");
        sim.init(start(), 60, GeneratorConfig::new(profile)).unwrap();
        sim.create(1, "Generator", ()).unwrap();
        sim
    }

    #[test]
    fn output_is_unset_before_first_step() {
        let sim = generator(Arc::new(TimeSeriesProfile::new([(start(), 1.0)]).unwrap()));
        assert_eq!(sim.entity("Generator_0").unwrap().p(), None);
    }

    #[test]
    fn next_step_follows_profile_updates() {
        let clock = Clock::new(start(), 60).unwrap();
        let profile = TimeSeriesProfile::new([
            (start(), 1.0),
            (clock.to_datetime(10).unwrap(), 2.0),
            (clock.to_datetime(25).unwrap(), 3.0),
        ])
        .unwrap();
        let mut sim = generator(Arc::new(profile));

        assert_eq!(sim.step(0, &Inputs::new()).unwrap(), Some(10));
        assert_eq!(sim.entity("Generator_0").unwrap().p(), Some(1.0));
        assert_eq!(sim.step(10, &Inputs::new()).unwrap(), Some(25));
        assert_eq!(sim.entity("Generator_0").unwrap().p(), Some(2.0));
        assert_eq!(sim.step(25, &Inputs::new()).unwrap(), None);
        assert_eq!(sim.entity("Generator_0").unwrap().p(), Some(3.0));
    }

    #[test]
    fn unaligned_profile_update_floors_to_containing_tick() {
        let clock = Clock::new(start(), 60).unwrap();
        let profile = TimeSeriesProfile::new([
            (start(), 1.0),
            (clock.to_datetime(3).unwrap() + chrono::TimeDelta::seconds(30), 2.0),
        ])
        .unwrap();
        let mut sim = generator(Arc::new(profile));
        assert_eq!(sim.step(0, &Inputs::new()).unwrap(), Some(3));
    }

    #[test]
    fn stepping_between_updates_matches_direct_lookup() {
        let profile = Arc::new(SolarProfile::new(5.0, 6.0, 18.0, 0.1, 3, 900).unwrap());
        let clock = Clock::new(start(), 60).unwrap();
        let mut sim = generator(profile.clone());

        let mut tick = 6 * 60;
        sim.step(0, &Inputs::new()).unwrap();
        while tick < 12 * 60 {
            let next = sim.step(tick, &Inputs::new()).unwrap().unwrap();
            let stepped = sim.entity("Generator_0").unwrap().p().unwrap();
            for t in tick..next {
                let direct = profile.power_at(clock.to_datetime(t).unwrap());
                assert_eq!(stepped, direct, "tick {t}");
            }
            tick = next;
        }
    }

    #[test]
    fn get_data_exposes_p() {
        let mut sim = generator(Arc::new(TimeSeriesProfile::new([(start(), 4.5)]).unwrap()));
        sim.step(0, &Inputs::new()).unwrap();
        let request =
            crate::sim::types::DataRequest::from([("Generator_0".to_string(), vec!["p".to_string()])]);
        let data = sim.get_data(&request).unwrap();
        assert_eq!(data["Generator_0"]["p"], Some(AttrValue::from(4.5)));
    }
}

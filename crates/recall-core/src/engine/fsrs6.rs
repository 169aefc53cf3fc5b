//! FSRS-6 memory model with short-term learning steps.
//!
//! Stability and difficulty follow the published FSRS-6 update rules using
//! the `fsrs` crate's default parameters; retrievability is computed by the
//! `fsrs` crate itself. On top of that sits the state machine that moves an
//! item through learning, review and relearning.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use super::MemoryModel;
use crate::config::SchedulingConfig;
use crate::types::{CardState, Grade, ItemState, ScheduleOutcome};

/// Retrievability reported for items with zero repetitions.
///
/// Never-practiced items have no memory trace to model, so this is a fixed
/// sentinel rather than a forgetting-curve value.
pub const UNPRACTICED_RETRIEVABILITY: f64 = 0.0;

/// FSRS-6 default weights, used for any slot the `fsrs` crate does not supply.
const FSRS6_WEIGHTS: [f64; 21] = [
    0.212, 1.2931, 2.3065, 8.2956, 6.4133, 0.8334, 3.0194, 0.001, 1.8722, 0.1666, 0.796, 1.4835,
    0.0614, 0.2629, 1.6483, 0.6014, 1.8729, 0.5425, 0.0912, 0.0658, 0.1542,
];

const S_MIN: f64 = 0.001;
const S_MAX: f64 = 36500.0;
const SECS_PER_DAY: f64 = 86_400.0;

/// Where a response sends the item next.
enum Transition {
    /// Stay in a short-term step.
    Step {
        state: CardState,
        index: usize,
        secs: u64,
    },
    /// Move to (or stay in) review with a day-granular interval.
    Graduate,
}

/// FSRS-6 scheduler for recall practice.
///
/// Correct answers are always graded `Good` and incorrect answers `Again`;
/// there is no self-rated confidence.
#[derive(Debug, Clone)]
pub struct FsrsEngine {
    weights: [f64; 21],
    decay: f64,
    config: SchedulingConfig,
}

impl FsrsEngine {
    /// Create an engine with default scheduling parameters.
    pub fn new() -> Self {
        Self::with_config(SchedulingConfig::default())
    }

    /// Create an engine with custom scheduling parameters.
    pub fn with_config(config: SchedulingConfig) -> Self {
        let mut weights = FSRS6_WEIGHTS;
        for (slot, w) in weights.iter_mut().zip(fsrs::DEFAULT_PARAMETERS.iter()) {
            *slot = f64::from(*w);
        }

        Self {
            weights,
            decay: f64::from(fsrs::FSRS6_DEFAULT_DECAY),
            config: config.normalized(),
        }
    }

    /// Scheduling parameters in use.
    pub fn config(&self) -> &SchedulingConfig {
        &self.config
    }

    /// Calculate retrievability given explicit stability and days elapsed.
    pub fn retrievability_after(&self, stability: f64, difficulty: f64, days_elapsed: f64) -> f64 {
        if days_elapsed <= 0.0 {
            return 1.0;
        }
        if stability <= S_MIN {
            return 0.0;
        }

        let memory = fsrs::MemoryState {
            stability: stability as f32,
            difficulty: difficulty as f32,
        };
        let r = fsrs::current_retrievability(memory, days_elapsed as f32, self.decay as f32);
        f64::from(r).clamp(0.0, 1.0)
    }

    fn factor(&self) -> f64 {
        0.9f64.powf(-1.0 / self.decay) - 1.0
    }

    fn grade_value(grade: Grade) -> f64 {
        f64::from(grade.to_rating())
    }

    fn init_stability(&self, grade: Grade) -> f64 {
        let idx = grade.to_rating() as usize - 1;
        self.weights[idx].max(S_MIN)
    }

    fn init_difficulty(&self, grade: Grade) -> f64 {
        let w = &self.weights;
        (w[4] - (w[5] * (Self::grade_value(grade) - 1.0)).exp() + 1.0).clamp(1.0, 10.0)
    }

    fn next_difficulty(&self, difficulty: f64, grade: Grade) -> f64 {
        let w = &self.weights;
        let delta = -w[6] * (Self::grade_value(grade) - 3.0);
        // Linear damping: steps shrink as difficulty approaches 10.
        let damped = difficulty + delta * (10.0 - difficulty) / 9.0;
        let reverted = w[7] * self.init_difficulty(Grade::Easy) + (1.0 - w[7]) * damped;
        reverted.clamp(1.0, 10.0)
    }

    fn recall_stability(&self, difficulty: f64, stability: f64, r: f64) -> f64 {
        let w = &self.weights;
        stability
            * (1.0
                + w[8].exp()
                    * (11.0 - difficulty)
                    * stability.powf(-w[9])
                    * ((w[10] * (1.0 - r)).exp() - 1.0))
    }

    fn forget_stability(&self, difficulty: f64, stability: f64, r: f64) -> f64 {
        let w = &self.weights;
        let long_term = w[11]
            * difficulty.powf(-w[12])
            * ((stability + 1.0).powf(w[13]) - 1.0)
            * (w[14] * (1.0 - r)).exp();
        let short_term_floor = stability / (w[17] * w[18]).exp();
        long_term.min(short_term_floor)
    }

    fn short_term_stability(&self, stability: f64, grade: Grade) -> f64 {
        let w = &self.weights;
        let g = Self::grade_value(grade);
        let next = stability * (w[17] * (g - 3.0 + w[18])).exp() * stability.powf(-w[19]);
        if grade == Grade::Again {
            next
        } else {
            next.max(stability)
        }
    }

    /// Whole-day interval for `stability` at the configured retention.
    fn review_interval_days(&self, stability: f64) -> f64 {
        let retention = self.config.desired_retention;
        let raw = stability / self.factor() * (retention.powf(-1.0 / self.decay) - 1.0);
        raw.round()
            .clamp(1.0, f64::from(self.config.maximum_interval_days))
    }

    /// New stability and difficulty after `grade`.
    fn next_memory(&self, current: &ItemState, grade: Grade, elapsed_days: f64) -> (f64, f64) {
        if current.is_unpracticed() {
            return (self.init_stability(grade), self.init_difficulty(grade));
        }

        let stability = current.stability.max(S_MIN);
        let difficulty = current.difficulty.clamp(1.0, 10.0);
        let next_difficulty = self.next_difficulty(difficulty, grade);

        let next_stability = if elapsed_days < 1.0 {
            self.short_term_stability(stability, grade)
        } else {
            let r = self.retrievability_after(stability, difficulty, elapsed_days);
            match grade {
                Grade::Again => self.forget_stability(difficulty, stability, r),
                _ => self.recall_stability(difficulty, stability, r),
            }
        };

        (next_stability.clamp(S_MIN, S_MAX), next_difficulty)
    }

    fn steps_for(&self, state: CardState) -> &[u64] {
        match state {
            CardState::Relearning => &self.config.relearning_steps_secs,
            _ => &self.config.learning_steps_secs,
        }
    }

    fn enter_step(&self, state: CardState, index: usize) -> Transition {
        match self.steps_for(state).get(index) {
            Some(&secs) => Transition::Step { state, index, secs },
            None => Transition::Graduate,
        }
    }

    fn transition(&self, current: &ItemState, grade: Grade) -> Transition {
        let step = current.learning_step as usize;
        match (current.state, grade) {
            (CardState::New, Grade::Again) => self.enter_step(CardState::Learning, 0),
            // A correct first answer skips the first step.
            (CardState::New, _) => self.enter_step(CardState::Learning, 1),
            (CardState::Learning, Grade::Again) => self.enter_step(CardState::Learning, 0),
            (CardState::Learning, _) => self.enter_step(CardState::Learning, step + 1),
            (CardState::Review, Grade::Again) => self.enter_step(CardState::Relearning, 0),
            (CardState::Review, _) => Transition::Graduate,
            (CardState::Relearning, Grade::Again) => self.enter_step(CardState::Relearning, 0),
            (CardState::Relearning, _) => self.enter_step(CardState::Relearning, step + 1),
        }
    }
}

impl Default for FsrsEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryModel for FsrsEngine {
    fn name(&self) -> &str {
        "fsrs-6"
    }

    fn initialize(&self, now: DateTime<Utc>) -> ItemState {
        ItemState::new_at(now)
    }

    fn schedule(&self, state: &ItemState, is_correct: bool, now: DateTime<Utc>) -> ScheduleOutcome {
        let grade = Grade::from_outcome(is_correct);

        let current = if state.is_well_formed() {
            state.clone()
        } else {
            warn!(state = ?state.state, reps = state.reps, "Malformed memory state, scheduling from a fresh state");
            self.initialize(now)
        };

        let elapsed_days = match current.last_review_at {
            Some(last) if !current.is_unpracticed() => {
                ((now - last).num_milliseconds() as f64 / 1000.0 / SECS_PER_DAY).max(0.0)
            }
            _ => 0.0,
        };

        let (stability, difficulty) = self.next_memory(&current, grade, elapsed_days);

        let mut lapses = current.lapses;
        if grade == Grade::Again
            && matches!(current.state, CardState::Review | CardState::Relearning)
        {
            lapses = lapses.saturating_add(1);
        }

        let (next_state, learning_step, interval_days, next_review_at) =
            match self.transition(&current, grade) {
                Transition::Step { state, index, secs } => (
                    state,
                    index as u32,
                    secs as f64 / SECS_PER_DAY,
                    now + Duration::seconds(secs as i64),
                ),
                Transition::Graduate => {
                    let days = self.review_interval_days(stability);
                    (CardState::Review, 0, days, now + Duration::days(days as i64))
                }
            };

        debug!(
            from = %current.state,
            to = %next_state,
            grade = %grade,
            stability,
            interval_days,
            "Scheduled review"
        );

        ScheduleOutcome {
            state: ItemState {
                state: next_state,
                stability,
                difficulty,
                elapsed_days,
                scheduled_days: interval_days,
                reps: current.reps.saturating_add(1),
                lapses,
                learning_step,
                last_review_at: Some(now),
                next_review_at: Some(next_review_at),
            },
            grade,
            interval_days,
        }
    }

    fn retrievability(&self, state: &ItemState, now: DateTime<Utc>) -> f64 {
        if state.is_unpracticed() || !state.is_well_formed() {
            return UNPRACTICED_RETRIEVABILITY;
        }

        let days_elapsed = match state.last_review_at {
            Some(last) => (now - last).num_milliseconds() as f64 / 1000.0 / SECS_PER_DAY,
            None => return 1.0,
        };

        self.retrievability_after(state.stability, state.difficulty, days_elapsed)
    }
}

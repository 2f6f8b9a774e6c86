use std::fmt;

/// Stages reported while training one scenario.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrainStage {
    LassoPath,
    ForestTrees,
    BoostingRounds,
}

impl TrainStage {
    pub fn describe(self) -> &'static str {
        match self {
            Self::LassoPath => "Lasso regularization path",
            Self::ForestTrees => "random forest trees",
            Self::BoostingRounds => "gradient boosting rounds",
        }
    }
}

impl fmt::Display for TrainStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Observer for reporting incremental progress while training estimators.
pub trait TrainProgressObserver {
    fn on_stage_start(&mut self, stage: TrainStage, total_steps: usize) {
        let _ = (stage, total_steps);
    }
    fn on_stage_advance(&mut self, stage: TrainStage, completed_steps: usize) {
        let _ = (stage, completed_steps);
    }
    fn on_stage_finish(&mut self, stage: TrainStage) {
        let _ = stage;
    }
}

#[derive(Default)]
pub struct NoopTrainProgress;

impl TrainProgressObserver for NoopTrainProgress {}

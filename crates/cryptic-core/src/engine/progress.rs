use super::error::ErrorKind;

/// How one structure of a multi-structure run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StructureStatus {
    Completed,
    Cancelled,
    Failed(ErrorKind),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Progress {
    TaskStart { total_steps: u64 },
    TaskFinish,

    /// Emitted in completion order, which under parallel dispatch need not
    /// match input order.
    StructureFinished {
        structure_id: String,
        status: StructureStatus,
    },

    GenerationStart { generation: u64 },
    MemberEvaluated { generation: u64, member: usize },
    /// Summary of a finished training generation.
    GenerationComplete {
        generation: u64,
        mean_reward: f64,
        max_reward: f64,
    },
}

pub type ProgressCallback<'a> = Box<dyn Fn(Progress) + Send + Sync + 'a>;

#[derive(Default)]
pub struct ProgressReporter<'a> {
    callback: Option<ProgressCallback<'a>>,
}

impl<'a> ProgressReporter<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(callback: ProgressCallback<'a>) -> Self {
        Self {
            callback: Some(callback),
        }
    }

    #[inline]
    pub fn report(&self, event: Progress) {
        if let Some(cb) = &self.callback {
            cb(event);
        }
    }

    /// Reports `TaskStart` now and `TaskFinish` when the returned guard is
    /// dropped, so early returns still close the task.
    pub fn task(&self, total_steps: usize) -> TaskGuard<'_, 'a> {
        self.report(Progress::TaskStart {
            total_steps: total_steps as u64,
        });
        TaskGuard { reporter: self }
    }

    pub fn structure_finished(&self, structure_id: &str, status: StructureStatus) {
        if self.callback.is_some() {
            self.report(Progress::StructureFinished {
                structure_id: structure_id.to_string(),
                status,
            });
        }
    }
}

pub struct TaskGuard<'r, 'a> {
    reporter: &'r ProgressReporter<'a>,
}

impl Drop for TaskGuard<'_, '_> {
    fn drop(&mut self) {
        self.reporter.report(Progress::TaskFinish);
    }
}

//! Job definitions: ordered, nestable lists of tasks.
//!
//! A [`JobDefinition`] is inert until flattened into numbered [`Step`]s.

use std::fmt;
use std::sync::Arc;

use crate::error::GrindError;
use crate::step::{Step, StepInfo};
use crate::task::Task;

/// One entry of a job: a bare task, or a nested job flattened in place.
pub enum JobEntry<T> {
    Task(Arc<dyn Task<T>>),
    Job(JobDefinition<T>),
}

impl<T> Clone for JobEntry<T> {
    fn clone(&self) -> Self {
        match self {
            JobEntry::Task(task) => JobEntry::Task(task.clone()),
            JobEntry::Job(job) => JobEntry::Job(job.clone()),
        }
    }
}

impl<T> From<JobDefinition<T>> for JobEntry<T> {
    fn from(job: JobDefinition<T>) -> Self {
        JobEntry::Job(job)
    }
}

/// A named, ordered workflow composed of tasks and nested job definitions.
///
/// Flattening is depth-first and pure: the same definition always yields
/// the same steps numbered `1..=N`, where `N` counts every leaf task.
/// Nesting does not affect numbering, so `job(A, job(B, C), D)` flattens
/// exactly like `job(A, B, C, D)`.
pub struct JobDefinition<T> {
    name: String,
    entries: Vec<JobEntry<T>>,
}

impl<T> Clone for JobDefinition<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            entries: self.entries.clone(),
        }
    }
}

impl<T> fmt::Debug for JobDefinition<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDefinition")
            .field("name", &self.name)
            .field("entries", &self.entries.len())
            .field("tasks", &self.len())
            .finish()
    }
}

impl<T> JobDefinition<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    pub fn from_entries(name: impl Into<String>, entries: impl IntoIterator<Item = JobEntry<T>>) -> Self {
        Self {
            name: name.into(),
            entries: entries.into_iter().collect(),
        }
    }

    pub fn task(self, task: impl Task<T> + 'static) -> Self {
        self.task_arc(Arc::new(task))
    }

    /// Adds a task shared with other definitions; it is referenced, not copied.
    pub fn task_arc(self, task: Arc<dyn Task<T>>) -> Self {
        self.then(JobEntry::Task(task))
    }

    pub fn job(self, job: JobDefinition<T>) -> Self {
        self.then(JobEntry::Job(job))
    }

    pub fn then(mut self, entry: JobEntry<T>) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entries(&self) -> &[JobEntry<T>] {
        &self.entries
    }

    /// Number of leaf tasks across the whole nesting.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| match entry {
                JobEntry::Task(_) => 1,
                JobEntry::Job(job) => job.len(),
            })
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send + 'static> JobDefinition<T> {

    /// Expands the definition into its ordered steps.
    ///
    /// Fails without running anything when a job name is blank, a task was
    /// given a blank description, or the whole definition holds no task.
    /// Tasks without a description are labelled `"<job> step <n>"`, `n`
    /// being the task's position within its own job.
    pub fn flatten(&self) -> Result<Vec<Step<T>>, GrindError> {
        let mut steps = Vec::with_capacity(self.len());
        self.flatten_into(&mut steps)?;
        if steps.is_empty() {
            return Err(GrindError::EmptyJob {
                job: self.name.clone(),
            });
        }
        Ok(steps)
    }

    fn flatten_into(&self, steps: &mut Vec<Step<T>>) -> Result<(), GrindError> {
        if self.name.trim().is_empty() {
            return Err(GrindError::BlankJobName);
        }
        for (index, entry) in self.entries.iter().enumerate() {
            let position = index + 1;
            match entry {
                JobEntry::Task(task) => {
                    let description = match task.description() {
                        Some(d) if d.trim().is_empty() => {
                            return Err(GrindError::BlankDescription {
                                job: self.name.clone(),
                                position,
                            });
                        }
                        Some(d) => d.to_string(),
                        None => format!("{} step {position}", self.name),
                    };
                    let sequence = steps.len() as u32 + 1;
                    steps.push(Step::new(
                        StepInfo::new(sequence, description, self.name.clone()),
                        task.clone(),
                    ));
                }
                JobEntry::Job(job) => job.flatten_into(steps)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{self, TaskContext};
    use crate::error::TaskError;

    fn named(description: &str) -> task::ValueTask<String> {
        task::value(description.to_uppercase()).describe(description)
    }

    fn infos(job: &JobDefinition<String>) -> Vec<(u32, String)> {
        job.flatten()
            .unwrap()
            .iter()
            .map(|s| (s.sequence(), s.info().description.clone()))
            .collect()
    }

    #[test]
    fn flattens_in_order_with_sequences() {
        let job = JobDefinition::new("provision")
            .task(named("create config"))
            .task(named("create cluster"))
            .task(named("fetch brokers"));

        assert_eq!(
            infos(&job),
            vec![
                (1, "create config".to_string()),
                (2, "create cluster".to_string()),
                (3, "fetch brokers".to_string()),
            ]
        );
    }

    #[test]
    fn nesting_is_associative() {
        let nested = JobDefinition::new("outer")
            .task(named("a"))
            .job(JobDefinition::new("inner").task(named("b")).task(named("c")))
            .task(named("d"));
        let flat = JobDefinition::new("outer")
            .task(named("a"))
            .task(named("b"))
            .task(named("c"))
            .task(named("d"));

        assert_eq!(nested.len(), 4);
        assert_eq!(infos(&nested), infos(&flat));
    }

    #[test]
    fn deep_nesting_is_depth_first() {
        let job = JobDefinition::new("root")
            .job(
                JobDefinition::new("level1")
                    .job(JobDefinition::new("level2").task(named("x")))
                    .task(named("y")),
            )
            .task(named("z"));

        let steps = job.flatten().unwrap();
        let jobs: Vec<_> = steps.iter().map(|s| s.info().job.as_str()).collect();
        assert_eq!(jobs, vec!["level2", "level1", "root"]);
        assert_eq!(infos(&job).iter().map(|(n, _)| *n).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn flattening_is_repeatable() {
        let job = JobDefinition::new("again")
            .task(named("one"))
            .job(JobDefinition::new("sub").task(named("two")));
        assert_eq!(infos(&job), infos(&job));
        assert_eq!(infos(&job.clone()), infos(&job));
    }

    #[test]
    fn undescribed_tasks_get_positional_labels() {
        let job = JobDefinition::new("kafka")
            .task(task::value("x".to_string()))
            .job(JobDefinition::new("brokers").task(task::value("y".to_string())));
        assert_eq!(
            infos(&job),
            vec![(1, "kafka step 1".to_string()), (2, "brokers step 1".to_string())]
        );
    }

    #[test]
    fn empty_job_is_rejected() {
        let job: JobDefinition<String> = JobDefinition::new("noop").job(JobDefinition::new("also-noop"));
        assert!(job.is_empty());
        assert!(matches!(job.flatten(), Err(GrindError::EmptyJob { job }) if job == "noop"));
    }

    #[test]
    fn blank_names_and_descriptions_are_rejected() {
        let job = JobDefinition::new("  ").task(named("a"));
        assert!(matches!(job.flatten(), Err(GrindError::BlankJobName)));

        let job = JobDefinition::new("outer").job(JobDefinition::new("").task(named("a")));
        assert!(matches!(job.flatten(), Err(GrindError::BlankJobName)));

        let job = JobDefinition::new("outer")
            .task(named("a"))
            .task(task::value("b".to_string()).describe(" "));
        assert!(matches!(
            job.flatten(),
            Err(GrindError::BlankDescription { position: 2, .. })
        ));
    }

    #[test]
    fn shared_tasks_are_referenced() {
        let shared: Arc<dyn Task<String>> = Arc::new(
            task::from_fn(|_ctx: TaskContext| async { Ok::<_, TaskError>("shared".to_string()) })
                .describe("shared"),
        );
        let job = JobDefinition::from_entries(
            "reuse",
            [JobEntry::Task(shared.clone()), JobEntry::Task(shared.clone())],
        );
        assert_eq!(job.len(), 2);
        assert_eq!(Arc::strong_count(&shared), 3);
        assert_eq!(job.flatten().unwrap().len(), 2);
    }

    #[test]
    fn debug_reports_name_and_task_count() {
        let job: JobDefinition<std::rc::Rc<u8>> = JobDefinition::new("inert");
        let rendered = format!("{job:?}");
        assert!(rendered.contains("\"inert\""));
        assert!(rendered.contains("tasks: 0"));

        let nested = JobDefinition::new("outer")
            .task(named("a"))
            .job(JobDefinition::new("inner").task(named("b")).task(named("c")));
        assert!(format!("{nested:?}").contains("tasks: 3"));
    }
}

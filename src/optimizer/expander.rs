use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::domain::Goal;

/// A goal's band evaluated at one grid index
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StepBound {
    pub index: usize,
    pub time: f64,
    pub min: f64,
    pub max: f64,
}

impl StepBound {
    pub fn violation(&self, value: f64) -> f64 {
        (self.min - value).max(0.0) + (value - self.max).max(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GoalScope {
    /// Expanded path goal, restricted to one grid index
    Step(usize),
    /// Horizon-wide goal with one violation shared by every step
    Horizon,
}

/// A goal (or one time step of a path goal) as seen by the problem builder
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubGoal {
    /// Position of the parent in the declared goal list
    pub goal: usize,
    pub label: String,
    pub state: String,
    pub priority: i32,
    pub weight: f64,
    pub nominal: f64,
    pub critical: bool,
    pub function_range: (f64, f64),
    pub scope: GoalScope,
    pub steps: Vec<StepBound>,
}

impl SubGoal {
    /// Worst distance outside the band over this sub-goal's steps, given the
    /// variable's values on the full grid.
    pub fn violation_in(&self, series: &[f64]) -> f64 {
        self.steps
            .iter()
            .map(|s| s.violation(series.get(s.index).copied().unwrap_or(f64::NAN)))
            .fold(0.0, f64::max)
    }
}

/// Fans path goals out over the time grid. Pure: the same goals and grid
/// always give the same sub-goals in the same order.
#[derive(Debug, Clone)]
pub struct GoalExpander {
    grid: Vec<f64>,
}

impl GoalExpander {
    pub fn new(grid: &[f64]) -> Self {
        Self {
            grid: grid.to_vec(),
        }
    }

    pub fn expand(&self, goal_index: usize, goal: &Goal) -> Vec<SubGoal> {
        let step = |index: usize| {
            let time = self.grid[index];
            let (min, max) = goal.evaluate_bound(time);
            StepBound {
                index,
                time,
                min,
                max,
            }
        };
        let sub_goal = |label: String, scope: GoalScope, steps: Vec<StepBound>| SubGoal {
            goal: goal_index,
            label,
            state: goal.state().to_string(),
            priority: goal.priority(),
            weight: goal.weight(),
            nominal: goal.nominal(),
            critical: goal.is_critical(),
            function_range: goal.function_range(),
            scope,
            steps,
        };

        if goal.is_path_goal() {
            (0..self.grid.len())
                .map(|i| sub_goal(format!("{}[{}]", goal.name(), i), GoalScope::Step(i), vec![step(i)]))
                .collect()
        } else {
            let steps = (0..self.grid.len()).map(step).collect();
            vec![sub_goal(goal.name().to_string(), GoalScope::Horizon, steps)]
        }
    }

    pub fn expand_all(&self, goals: &[Goal]) -> Vec<SubGoal> {
        goals
            .iter()
            .enumerate()
            .flat_map(|(i, goal)| self.expand(i, goal))
            .collect()
    }
}

/// All sub-goals sharing one priority value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriorityLevel {
    pub priority: i32,
    pub goals: Vec<SubGoal>,
}

impl PriorityLevel {
    /// Labels of the declared goals active at this level, in declaration order
    pub fn goal_names(&self, goals: &[Goal]) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for sub in &self.goals {
            if let Some(goal) = goals.get(sub.goal) {
                if !names.iter().any(|n| n == goal.name()) {
                    names.push(goal.name().to_string());
                }
            }
        }
        names
    }

    /// Declared goals whose bands on the same variable do not intersect at
    /// some grid index. No assignment can satisfy both, so the level cannot
    /// be met whatever the solver does.
    pub fn conflicting_goals(&self, goals: &[Goal]) -> Vec<String> {
        let mut by_step: BTreeMap<(&str, usize), Vec<(usize, &StepBound)>> = BTreeMap::new();
        for sub in &self.goals {
            for step in &sub.steps {
                by_step
                    .entry((sub.state.as_str(), step.index))
                    .or_default()
                    .push((sub.goal, step));
            }
        }

        let mut conflicting = BTreeSet::new();
        for bands in by_step.values() {
            for (i, (a, first)) in bands.iter().enumerate() {
                for (b, second) in &bands[i + 1..] {
                    if a != b && first.min.max(second.min) > first.max.min(second.max) {
                        conflicting.insert(*a);
                        conflicting.insert(*b);
                    }
                }
            }
        }
        conflicting
            .into_iter()
            .filter_map(|i| goals.get(i).map(|g| g.name().to_string()))
            .collect()
    }
}

/// Group sub-goals into levels in strictly increasing priority order
pub fn group_by_priority(subs: Vec<SubGoal>) -> Vec<PriorityLevel> {
    let mut levels: BTreeMap<i32, Vec<SubGoal>> = BTreeMap::new();
    for sub in subs {
        levels.entry(sub.priority).or_default().push(sub);
    }
    levels
        .into_iter()
        .map(|(priority, goals)| PriorityLevel { priority, goals })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Timeseries;
    use proptest::prelude::*;

    #[test]
    fn test_path_goal_expands_per_step() {
        let goal = Goal::range("level", 10.0, 12.0)
            .name("band")
            .priority(3)
            .weight(2.0)
            .build()
            .unwrap();
        let expander = GoalExpander::new(&[0.0, 60.0, 120.0]);

        let subs = expander.expand(0, &goal);
        assert_eq!(subs.len(), 3);
        for (i, sub) in subs.iter().enumerate() {
            assert_eq!(sub.scope, GoalScope::Step(i));
            assert_eq!(sub.steps.len(), 1);
            assert_eq!(sub.steps[0].index, i);
            assert_eq!(sub.priority, 3);
            assert_eq!(sub.weight, 2.0);
        }
        assert_eq!(subs[1].label, "band[1]");
    }

    #[test]
    fn test_horizon_goal_passes_through() {
        let goal = Goal::target("extraction", 5.0).path(false).build().unwrap();
        let subs = GoalExpander::new(&[0.0, 1.0, 2.0, 3.0]).expand(4, &goal);
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].scope, GoalScope::Horizon);
        assert_eq!(subs[0].steps.len(), 4);
        assert_eq!(subs[0].goal, 4);
    }

    #[test]
    fn test_steps_follow_time_varying_band() {
        let max = Timeseries::new(vec![0.0, 100.0], vec![10.0, 20.0]).unwrap();
        let goal = Goal::range("level", 0.0, max).build().unwrap();
        let subs = GoalExpander::new(&[0.0, 50.0, 100.0]).expand(0, &goal);
        assert_eq!(subs[1].steps[0].max, 15.0);
    }

    #[test]
    fn test_violation_in_takes_worst_step() {
        let goal = Goal::range("level", 10.0, 12.0).path(false).build().unwrap();
        let sub = &GoalExpander::new(&[0.0, 1.0, 2.0]).expand(0, &goal)[0];
        assert_eq!(sub.violation_in(&[11.0, 13.5, 9.0]), 1.5);
    }

    #[test]
    fn test_levels_sorted_ascending() {
        let goals = vec![
            Goal::target("a", 1.0).priority(20).build().unwrap(),
            Goal::target("b", 1.0).priority(-3).build().unwrap(),
            Goal::target("c", 1.0).priority(20).build().unwrap(),
        ];
        let expander = GoalExpander::new(&[0.0, 1.0]);
        let levels = group_by_priority(expander.expand_all(&goals));

        let priorities: Vec<i32> = levels.iter().map(|l| l.priority).collect();
        assert_eq!(priorities, vec![-3, 20]);
        assert_eq!(levels[1].goals.len(), 4);
        assert_eq!(
            levels[1].goal_names(&goals),
            vec!["a:target@p20".to_string(), "c:target@p20".to_string()]
        );
    }

    #[test]
    fn test_disjoint_bands_conflict() {
        let goals = vec![
            Goal::range("level", 10.0, 12.0).name("low").build().unwrap(),
            Goal::at_most("level", 11.0).name("cap").path(false).build().unwrap(),
            Goal::range("level", 20.0, 22.0).name("high").build().unwrap(),
            Goal::range("extraction", 0.0, 1.0).name("other").build().unwrap(),
        ];
        let levels = group_by_priority(GoalExpander::new(&[0.0, 1.0]).expand_all(&goals));
        assert_eq!(levels.len(), 1);
        assert_eq!(
            levels[0].conflicting_goals(&goals),
            vec!["low".to_string(), "cap".to_string(), "high".to_string()]
        );
    }

    #[test]
    fn test_touching_bands_do_not_conflict() {
        let goals = vec![
            Goal::range("level", 10.0, 12.0).name("low").build().unwrap(),
            Goal::range("level", 12.0, 14.0).name("high").build().unwrap(),
        ];
        let levels = group_by_priority(GoalExpander::new(&[0.0, 1.0]).expand_all(&goals));
        assert!(levels[0].conflicting_goals(&goals).is_empty());
    }

    proptest! {
        #[test]
        fn prop_expansion_is_total_and_deterministic(
            n in 1usize..40,
            lo in -100.0f64..100.0,
            width in 0.0f64..50.0,
            path in any::<bool>(),
        ) {
            let grid: Vec<f64> = (0..n).map(|i| i as f64 * 300.0).collect();
            let goal = Goal::range("x", lo, lo + width).path(path).build().unwrap();
            let expander = GoalExpander::new(&grid);

            let first = expander.expand(0, &goal);
            let second = expander.expand(0, &goal);
            prop_assert_eq!(&first, &second);

            if path {
                prop_assert_eq!(first.len(), n);
                for (i, sub) in first.iter().enumerate() {
                    prop_assert_eq!(sub.steps.len(), 1);
                    prop_assert_eq!(sub.steps[0].index, i);
                }
            } else {
                prop_assert_eq!(first.len(), 1);
                prop_assert_eq!(first[0].steps.len(), n);
            }
        }
    }
}

//! File-to-formatter routing.
//!
//! For each walked file the router computes the applicable set: every
//! active formatter whose includes accept the path, minus per-formatter
//! excludes, with globally excluded paths matching nothing at all.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::formatter::Formatter;
use super::planner::Plan;
use crate::glob::PatternSet;

/// One routable formatter, flattened out of the plan.
#[derive(Debug, Clone)]
pub struct Route {
    /// Index of the wave the formatter runs in.
    pub wave: usize,
    pub formatter: Arc<Formatter>,
}

/// Routes files to the formatters that claim them.
#[derive(Debug)]
pub struct Router {
    global_excludes: PatternSet,
    routes: Vec<Route>,
    overlap_warned: AtomicBool,
}

impl Router {
    /// Build a router over the planned formatter set.
    #[must_use]
    pub fn new(global_excludes: PatternSet, plan: &Plan) -> Self {
        let routes = plan
            .waves
            .iter()
            .enumerate()
            .flat_map(|(wave, formatters)| {
                formatters.iter().map(move |formatter| Route {
                    wave,
                    formatter: Arc::clone(formatter),
                })
            })
            .collect();

        Self {
            global_excludes,
            routes,
            overlap_warned: AtomicBool::new(false),
        }
    }

    /// The flattened routes, index-aligned with [`Router::applicable`]
    /// results.
    #[must_use]
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Indices of the formatters that should process `rel`.
    ///
    /// An empty result means the file is unmatched and dropped. Two
    /// independent formatters of the same wave claiming one file leaves
    /// their relative order undefined; the first occurrence is warned
    /// about once per run.
    #[must_use]
    pub fn applicable(&self, rel: &Path) -> Vec<usize> {
        if self.global_excludes.is_match(rel) {
            return Vec::new();
        }

        let matched: Vec<usize> = self
            .routes
            .iter()
            .enumerate()
            .filter(|(_, route)| route.formatter.is_match(rel))
            .map(|(i, _)| i)
            .collect();

        self.warn_same_wave_overlap(rel, &matched);

        matched
    }

    fn warn_same_wave_overlap(&self, rel: &Path, matched: &[usize]) {
        if matched.len() < 2 || self.overlap_warned.load(Ordering::Relaxed) {
            return;
        }
        for pair in matched.windows(2) {
            let (a, b) = (&self.routes[pair[0]], &self.routes[pair[1]]);
            if a.wave == b.wave && !self.overlap_warned.swap(true, Ordering::Relaxed) {
                tracing::warn!(
                    path = %rel.display(),
                    first = %a.formatter.name,
                    second = %b.formatter.name,
                    "independent formatters in the same batch claim one file; \
                     their write order is undefined"
                );
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FormatterConfig;
    use crate::engine::planner::plan;

    fn formatter(name: &str, includes: &[&str], before: Option<&str>) -> Formatter {
        Formatter::from_config(
            name,
            &FormatterConfig {
                command: "true".to_string(),
                options: vec![],
                includes: includes.iter().map(ToString::to_string).collect(),
                excludes: vec![],
                before: before.map(ToString::to_string),
                priority: 0,
            },
        )
        .unwrap()
    }

    fn router(global_excludes: &[&str], formatters: Vec<Formatter>) -> Router {
        let excludes =
            PatternSet::compile(&global_excludes.iter().map(ToString::to_string).collect::<Vec<_>>())
                .unwrap();
        Router::new(excludes, &plan(formatters, None).unwrap())
    }

    fn names(router: &Router, rel: &str) -> Vec<String> {
        router
            .applicable(Path::new(rel))
            .into_iter()
            .map(|i| router.routes()[i].formatter.name.clone())
            .collect()
    }

    #[test]
    fn test_routes_by_extension() {
        let r = router(
            &[],
            vec![
                formatter("elm", &["*.elm"], None),
                formatter("nix", &["*.nix"], None),
            ],
        );

        assert_eq!(names(&r, "src/Main.elm"), vec!["elm"]);
        assert_eq!(names(&r, "default.nix"), vec!["nix"]);
        assert!(names(&r, "README.md").is_empty());
    }

    #[test]
    fn test_global_excludes_beat_includes() {
        let r = router(&["*.nix"], vec![formatter("all", &["*"], None)]);

        assert!(names(&r, "default.nix").is_empty());
        assert_eq!(names(&r, "main.rs"), vec!["all"]);
    }

    #[test]
    fn test_multiple_formatters_match() {
        let r = router(
            &[],
            vec![
                formatter("first", &["*.md"], Some("second")),
                formatter("second", &["*.md"], None),
            ],
        );

        assert_eq!(names(&r, "doc.md"), vec!["first", "second"]);
    }

    #[test]
    fn test_routes_align_with_waves() {
        let r = router(
            &[],
            vec![
                formatter("late", &["*"], None),
                formatter("early", &["*"], Some("late")),
            ],
        );

        let routes = r.routes();
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].formatter.name, "early");
        assert_eq!(routes[0].wave, 0);
        assert_eq!(routes[1].formatter.name, "late");
        assert_eq!(routes[1].wave, 1);
    }
}

//! Corpus walker tests against a throwaway project directory.

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::{Path, PathBuf};

    use crate::config::SyncConfig;
    use crate::discovery::{CorpusWalker, FileOutcome, WalkOptions};
    use crate::validate::ContextHint;

    const NEEDS_DECLARATION: &str = "import { createClient } from '@/lib/supabase/server';\n\nexport async function load() {\n  return supabase.from('a').select();\n}\n";
    const SYNCHRONIZED: &str = "import { createClient } from '@/lib/supabase/server';\n\nexport async function load() {\n  const supabase = await createClient();\n  return supabase.from('a').select();\n}\n";
    const MALFORMED: &str = "export function broken() {\n  supabase.from('a');\n";

    fn write(base: &Path, rel: &str, text: &str) -> PathBuf {
        let path = base.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, text).unwrap();
        path
    }

    fn project() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path();
        write(base, "app/page.tsx", NEEDS_DECLARATION);
        write(base, "app/done.ts", SYNCHRONIZED);
        write(base, "app/broken.ts", MALFORMED);
        write(base, "app/styles.css", NEEDS_DECLARATION);
        write(base, "app/node_modules/pkg/index.ts", NEEDS_DECLARATION);
        write(base, "lib/supabase/server.ts", NEEDS_DECLARATION);
        dir
    }

    fn walker(base: &Path, dry_run: bool, use_cache: bool) -> CorpusWalker {
        walker_with(base, SyncConfig::default(), ContextHint::Server, dry_run, use_cache)
    }

    fn walker_with(
        base: &Path,
        config: SyncConfig,
        context: ContextHint,
        dry_run: bool,
        use_cache: bool,
    ) -> CorpusWalker {
        let options = WalkOptions {
            dry_run,
            use_cache,
            context: Some(context),
        };
        CorpusWalker::new(base, config, options).unwrap()
    }

    fn outcome_of<'a>(summary: &'a crate::discovery::Summary, rel: &str) -> &'a FileOutcome {
        &summary
            .reports
            .iter()
            .find(|r| r.path == Path::new(rel))
            .unwrap_or_else(|| panic!("no report for {}", rel))
            .outcome
    }

    #[test]
    fn test_discovery_filters_extensions_exclusions_and_skips() {
        let dir = project();
        let files = walker(dir.path(), true, false).discover();
        let rel: Vec<PathBuf> = files
            .iter()
            .map(|f| f.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            rel,
            vec![
                PathBuf::from("app/broken.ts"),
                PathBuf::from("app/done.ts"),
                PathBuf::from("app/page.tsx"),
            ]
        );
    }

    #[test]
    fn test_run_rewrites_only_what_changed() {
        let dir = project();
        let summary = walker(dir.path(), false, false).run();

        assert_eq!(summary.files, 3);
        assert_eq!(summary.rewritten, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.failed, 1);

        assert!(matches!(
            outcome_of(&summary, "app/page.tsx"),
            FileOutcome::Rewritten { edits: 1 }
        ));
        assert_eq!(
            fs::read_to_string(dir.path().join("app/page.tsx")).unwrap(),
            SYNCHRONIZED
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("lib/supabase/server.ts")).unwrap(),
            NEEDS_DECLARATION
        );
    }

    #[test]
    fn test_malformed_file_is_reported_and_untouched() {
        let dir = project();
        let summary = walker(dir.path(), false, false).run();
        match outcome_of(&summary, "app/broken.ts") {
            FileOutcome::Failed { code, .. } => assert_eq!(code, "SYNC-ERR-MALFORMED"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            fs::read_to_string(dir.path().join("app/broken.ts")).unwrap(),
            MALFORMED
        );
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = project();
        let summary = walker(dir.path(), true, true).run();
        assert!(summary.dry_run);
        assert_eq!(summary.rewritten, 1);
        assert_eq!(
            fs::read_to_string(dir.path().join("app/page.tsx")).unwrap(),
            NEEDS_DECLARATION
        );
        assert!(!dir.path().join(".declsync").exists());
    }

    #[test]
    fn test_cache_skips_converged_files_on_second_run() {
        let dir = project();
        let first = walker(dir.path(), false, true).run();
        assert_eq!(first.cached, 0);

        let second = walker(dir.path(), false, true).run();
        assert_eq!(second.cached, 2);
        assert_eq!(second.rewritten, 0);
        assert_eq!(second.failed, 1);
        assert!(matches!(outcome_of(&second, "app/done.ts"), FileOutcome::Cached));
    }

    #[test]
    fn test_cache_is_keyed_by_context() {
        let dir = project();
        let client = walker_with(dir.path(), SyncConfig::default(), ContextHint::Client, false, true).run();
        assert_eq!(client.cached, 0);
        assert!(matches!(
            outcome_of(&client, "app/page.tsx"),
            FileOutcome::Rewritten { .. }
        ));
        let page = fs::read_to_string(dir.path().join("app/page.tsx")).unwrap();
        assert!(page.contains("\nconst supabase = createClient();\n"));

        let server = walker_with(dir.path(), SyncConfig::default(), ContextHint::Server, false, true).run();
        assert_eq!(server.cached, 0);
        assert!(matches!(
            outcome_of(&server, "app/page.tsx"),
            FileOutcome::Rewritten { .. }
        ));
        let page = fs::read_to_string(dir.path().join("app/page.tsx")).unwrap();
        assert!(page.contains("  const supabase = await createClient();\n  return supabase.from('a')"));
        assert!(!page.contains("const supabase = createClient();"));
    }

    #[test]
    fn test_convergence_failure_leaves_file_untouched() {
        let dir = project();
        let mut config = SyncConfig::default();
        config.handle.server_form =
            "const supabase = await createClient(); let supabase = 1;".to_string();
        let summary = walker_with(dir.path(), config, ContextHint::Server, false, false).run();
        match outcome_of(&summary, "app/page.tsx") {
            FileOutcome::Failed { code, .. } => assert_eq!(code, "SYNC-ERR-CONVERGENCE"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            fs::read_to_string(dir.path().join("app/page.tsx")).unwrap(),
            NEEDS_DECLARATION
        );
    }

    #[test]
    fn test_summary_serializes_with_status_tags() {
        let dir = project();
        let summary = walker(dir.path(), true, false).run();
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["files"], 3);
        let statuses: Vec<&str> = json["reports"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["status"].as_str().unwrap())
            .collect();
        assert_eq!(statuses, vec!["failed", "unchanged", "rewritten"]);
    }
}

//! End-to-end synchronization tests.
//!
//! Each case runs the full pipeline (tree, classification, scan, resolution,
//! edits, fixpoint check) on a small but realistic file and compares the
//! complete output text.

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use crate::config::HandleConfig;
    use crate::transform::{synchronize, SyncResult, Synchronizer};
    use crate::validate::{
        ContextHint, EngineError, SYNC_UNREACHABLE_USAGE, SYNC_AMBIGUOUS_CONTEXT, SYNC_DEDUPLICATE, SYNC_IMPORT_ADDED,
        SYNC_PRUNE, SYNC_REFORM, SYNC_RELOCATE, SYNC_REMOVE_INVALID,
    };

    const SERVER_IMPORT: &str = "import { createClient } from '@/lib/supabase/server';\n\n";

    fn run(text: &str, hint: ContextHint) -> SyncResult {
        let result = synchronize(text, hint).unwrap();
        assert_converged(&result.new_text, hint);
        result
    }

    /// Second pass is a no-op and the output satisfies every placement rule.
    fn assert_converged(text: &str, hint: ContextHint) {
        let again = synchronize(text, hint).unwrap();
        assert!(again.edits.is_empty(), "not idempotent: {:?}", again.edits);
        assert_eq!(again.new_text, text);

        let synchronizer = Synchronizer::new(&HandleConfig::default()).unwrap();
        let analysis = synchronizer.analyze(text, hint).unwrap();
        assert!(analysis.plan.is_converged());
        assert!(analysis.scan.declarations.iter().all(|d| d.valid));
    }

    fn has_code(result: &SyncResult, code: &str) -> bool {
        result.diagnostics.iter().any(|d| d.code == code)
    }

    /// Text with every canonical declaration line removed.
    fn strip_declarations(text: &str) -> String {
        let handle = HandleConfig::default();
        text.lines()
            .filter(|l| l.trim() != handle.client_form && l.trim() != handle.server_form)
            .collect::<Vec<_>>()
            .join("\n")
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // SCENARIOS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_missing_declaration_is_inserted_in_server_body() {
        let input = format!(
            "{}export async function getPosts() {{\n  const {{ data }} = await supabase.from('posts').select();\n  return data;\n}}\n",
            SERVER_IMPORT
        );
        let expected = format!(
            "{}export async function getPosts() {{\n  const supabase = await createClient();\n  const {{ data }} = await supabase.from('posts').select();\n  return data;\n}}\n",
            SERVER_IMPORT
        );
        let result = run(&input, ContextHint::Server);
        assert_eq!(result.new_text, expected);
        assert_eq!(result.edits.len(), 1);
        assert_eq!(strip_declarations(&input), strip_declarations(&result.new_text));
    }

    #[test]
    fn test_declaration_in_parameter_list_is_moved_into_body() {
        let input = format!(
            "{}export default async function Page({{\n  const supabase = await createClient();\n  params,\n}}: {{\n  params: {{ id: string }};\n}}) {{\n  const {{ data }} = await supabase.from('items').select().eq('id', params.id);\n  return data;\n}}\n",
            SERVER_IMPORT
        );
        let expected = format!(
            "{}export default async function Page({{\n  params,\n}}: {{\n  params: {{ id: string }};\n}}) {{\n  const supabase = await createClient();\n  const {{ data }} = await supabase.from('items').select().eq('id', params.id);\n  return data;\n}}\n",
            SERVER_IMPORT
        );
        let result = run(&input, ContextHint::Server);
        assert_eq!(result.new_text, expected);
        assert!(has_code(&result, SYNC_REMOVE_INVALID));
        assert_eq!(strip_declarations(&input), strip_declarations(&result.new_text));
    }

    #[test]
    fn test_duplicate_declarations_keep_the_first() {
        let input = format!(
            "{}export async function load() {{\n  const supabase = await createClient();\n  const supabase = await createClient();\n  return supabase.from('a').select();\n}}\n",
            SERVER_IMPORT
        );
        let expected = format!(
            "{}export async function load() {{\n  const supabase = await createClient();\n  return supabase.from('a').select();\n}}\n",
            SERVER_IMPORT
        );
        let result = run(&input, ContextHint::Server);
        assert_eq!(result.new_text, expected);
        assert_eq!(result.edits.len(), 1);
        assert!(has_code(&result, SYNC_DEDUPLICATE));
    }

    #[test]
    fn test_usage_in_object_literal_is_served_by_enclosing_body() {
        let input = format!(
            "{}export async function save(id: string) {{\n  const payload = {{\n    id,\n    query: supabase.from('rows'),\n  }};\n  return payload;\n}}\n",
            SERVER_IMPORT
        );
        let expected = format!(
            "{}export async function save(id: string) {{\n  const supabase = await createClient();\n  const payload = {{\n    id,\n    query: supabase.from('rows'),\n  }};\n  return payload;\n}}\n",
            SERVER_IMPORT
        );
        let result = run(&input, ContextHint::Server);
        assert_eq!(result.new_text, expected);
        assert_eq!(strip_declarations(&input), strip_declarations(&result.new_text));
    }

    #[test]
    fn test_unbalanced_braces_fail_without_edits() {
        let input = "export function a() {\n  supabase.from('x');\n";
        match synchronize(input, ContextHint::Server) {
            Err(EngineError::MalformedSource { offset, line, .. }) => {
                assert_eq!(offset, input.find('{').unwrap());
                assert_eq!(line, 1);
            }
            other => panic!("expected malformed source, got {:?}", other),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // REPAIRS
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_declaration_injected_into_call_argument_is_relocated() {
        let input = format!(
            "{}export async function save() {{\n  return insert({{\n    const supabase = await createClient();\n    table: 'rows',\n    client: supabase.from('rows'),\n  }});\n}}\n",
            SERVER_IMPORT
        );
        let expected = format!(
            "{}export async function save() {{\n  const supabase = await createClient();\n  return insert({{\n    table: 'rows',\n    client: supabase.from('rows'),\n  }});\n}}\n",
            SERVER_IMPORT
        );
        let result = run(&input, ContextHint::Server);
        assert_eq!(result.new_text, expected);
    }

    #[test]
    fn test_declaration_in_control_block_moves_to_function_top() {
        let input = format!(
            "{}export async function load(flag: boolean) {{\n  if (flag) {{\n    const supabase = await createClient();\n    return supabase.from('a').select();\n  }}\n  return null;\n}}\n",
            SERVER_IMPORT
        );
        let expected = format!(
            "{}export async function load(flag: boolean) {{\n  const supabase = await createClient();\n  if (flag) {{\n    return supabase.from('a').select();\n  }}\n  return null;\n}}\n",
            SERVER_IMPORT
        );
        let result = run(&input, ContextHint::Server);
        assert_eq!(result.new_text, expected);
        assert!(has_code(&result, SYNC_RELOCATE));
        assert_eq!(strip_declarations(&input), strip_declarations(&result.new_text));
    }

    #[test]
    fn test_unused_declaration_is_pruned() {
        let input = format!(
            "{}export async function helper() {{\n  const supabase = await createClient();\n  return 1;\n}}\n",
            SERVER_IMPORT
        );
        let expected = format!(
            "{}export async function helper() {{\n  return 1;\n}}\n",
            SERVER_IMPORT
        );
        let result = run(&input, ContextHint::Server);
        assert_eq!(result.new_text, expected);
        assert!(has_code(&result, SYNC_PRUNE));
    }

    #[test]
    fn test_parameter_named_like_handle_is_respected() {
        let input = "export async function list(supabase: Client, ids: string[]) {\n  return Promise.all(ids.map((id) => supabase.from('t').select().eq('id', id)));\n}\n";
        let result = run(input, ContextHint::Server);
        assert_eq!(result.new_text, input);
        assert!(result.edits.is_empty());
    }

    #[test]
    fn test_unmanaged_binding_is_never_edited() {
        let input = "import { createServerClient } from '@supabase/ssr';\n\nexport async function middleware(req: Request) {\n  const supabase = createServerClient(url, key, { cookies });\n  await supabase.auth.getUser();\n}\n";
        let result = run(input, ContextHint::Server);
        assert_eq!(result.new_text, input);
    }

    #[test]
    fn test_declaration_in_import_block_is_removed() {
        let input = "import {\n  const supabase = await createClient();\n  createClient,\n} from '@/lib/supabase/server';\n\nexport async function load() {\n  return supabase.from('a').select();\n}\n";
        let expected = "import {\n  createClient,\n} from '@/lib/supabase/server';\n\nexport async function load() {\n  const supabase = await createClient();\n  return supabase.from('a').select();\n}\n";
        let result = run(input, ContextHint::Server);
        assert_eq!(result.new_text, expected);
        assert!(has_code(&result, SYNC_REMOVE_INVALID));
        assert!(!has_code(&result, SYNC_IMPORT_ADDED));
    }

    #[test]
    fn test_declaration_in_return_type_literal_is_moved_into_body() {
        let input = format!(
            "{}export async function load(): Promise<{{\n  const supabase = await createClient();\n  data: unknown;\n  error: null;\n}}> {{\n  return supabase.from('a').select();\n}}\n",
            SERVER_IMPORT
        );
        let expected = format!(
            "{}export async function load(): Promise<{{\n  data: unknown;\n  error: null;\n}}> {{\n  const supabase = await createClient();\n  return supabase.from('a').select();\n}}\n",
            SERVER_IMPORT
        );
        let result = run(&input, ContextHint::Server);
        assert_eq!(result.new_text, expected);
        assert_eq!(result.edits.len(), 2);
        assert!(has_code(&result, SYNC_REMOVE_INVALID));
        assert_eq!(strip_declarations(&input), strip_declarations(&result.new_text));
    }

    #[test]
    fn test_body_after_return_type_literal_hosts_its_declaration() {
        let input = format!(
            "{}export async function load(): Promise<{{ data: unknown; error: null }}> {{\n  return supabase.from('a').select();\n}}\n\nexport class Repo {{\n  async find(id: string): Promise<{{ a: string; b: number }}> {{\n    return supabase.from('r').select().eq('id', id);\n  }}\n}}\n",
            SERVER_IMPORT
        );
        let expected = format!(
            "{}export async function load(): Promise<{{ data: unknown; error: null }}> {{\n  const supabase = await createClient();\n  return supabase.from('a').select();\n}}\n\nexport class Repo {{\n  async find(id: string): Promise<{{ a: string; b: number }}> {{\n    const supabase = await createClient();\n    return supabase.from('r').select().eq('id', id);\n  }}\n}}\n",
            SERVER_IMPORT
        );
        let result = run(&input, ContextHint::Server);
        assert_eq!(result.new_text, expected);
        assert_eq!(result.edits.len(), 2);
    }

    #[test]
    fn test_form_that_cannot_settle_fails_convergence() {
        let mut handle = HandleConfig::default();
        handle.server_form = "const supabase = await createClient(); let supabase = 1;".to_string();
        let synchronizer = Synchronizer::new(&handle).unwrap();
        let input = format!(
            "{}export async function load() {{\n  return supabase.from('a').select();\n}}\n",
            SERVER_IMPORT
        );
        match synchronizer.synchronize(&input, ContextHint::Server) {
            Err(EngineError::Convergence { residual_actions }) => {
                assert!(!residual_actions.is_empty());
                assert!(residual_actions.iter().any(|a| a.contains("Shadowed")));
            }
            other => panic!("expected convergence failure, got {:?}", other),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // JSX
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_usage_after_self_closing_jsx_tag_is_seen() {
        let input = "'use client';\n\nimport { createClient } from '@/lib/supabase/client';\n\nexport function Nav({ x }: { x: string }) {\n  return <div><Foo a={x} /><Bar b={() => supabase.auth.signOut()} /></div>;\n}\n";
        let expected = "'use client';\n\nimport { createClient } from '@/lib/supabase/client';\n\nconst supabase = createClient();\n\nexport function Nav({ x }: { x: string }) {\n  return <div><Foo a={x} /><Bar b={() => supabase.auth.signOut()} /></div>;\n}\n";
        let result = run(input, ContextHint::Unknown);
        assert_eq!(result.new_text, expected);
    }

    #[test]
    fn test_jsx_prose_does_not_break_the_tree() {
        let input = format!(
            "{}export default async function Page() {{\n  const {{ data }} = await supabase.from('requests').select();\n  return (\n    <p>\n      Once you've sent it (separate from\n      messages), we'll reply. See supabase.auth docs.\n    </p>\n  );\n}}\n",
            SERVER_IMPORT
        );
        let expected = format!(
            "{}export default async function Page() {{\n  const supabase = await createClient();\n  const {{ data }} = await supabase.from('requests').select();\n  return (\n    <p>\n      Once you've sent it (separate from\n      messages), we'll reply. See supabase.auth docs.\n    </p>\n  );\n}}\n",
            SERVER_IMPORT
        );
        let result = run(&input, ContextHint::Server);
        assert_eq!(result.new_text, expected);
        assert!(!has_code(&result, SYNC_UNREACHABLE_USAGE));
    }

    // ═══════════════════════════════════════════════════════════════════════════════
    // EXECUTION CONTEXT
    // ═══════════════════════════════════════════════════════════════════════════════

    #[test]
    fn test_client_file_shares_one_module_declaration() {
        let input = "'use client';\n\nimport { useEffect } from 'react';\n\nexport default function Profile() {\n  useEffect(() => {\n    supabase.auth.getUser();\n  }, []);\n  return null;\n}\n";
        let expected = "'use client';\nimport { createClient } from '@/lib/supabase/client';\n\nimport { useEffect } from 'react';\n\nconst supabase = createClient();\n\nexport default function Profile() {\n  useEffect(() => {\n    supabase.auth.getUser();\n  }, []);\n  return null;\n}\n";
        let result = run(input, ContextHint::Unknown);
        assert_eq!(result.new_text, expected);
        assert!(has_code(&result, SYNC_IMPORT_ADDED));
        assert!(!has_code(&result, SYNC_AMBIGUOUS_CONTEXT));
        assert!(!result.new_text.contains("await createClient"));
    }

    #[test]
    fn test_client_form_in_server_body_is_reformed() {
        let input = format!(
            "{}export async function GET() {{\n  const supabase = createClient();\n  return supabase.auth.getUser();\n}}\n",
            SERVER_IMPORT
        );
        let expected = format!(
            "{}export async function GET() {{\n  const supabase = await createClient();\n  return supabase.auth.getUser();\n}}\n",
            SERVER_IMPORT
        );
        let result = run(&input, ContextHint::Server);
        assert_eq!(result.new_text, expected);
        assert!(has_code(&result, SYNC_REFORM));
    }

    #[test]
    fn test_inline_server_action_gets_its_own_declaration() {
        let input = "export default async function Page() {\n  async function save(form: FormData) {\n    'use server';\n    await supabase.from('t').insert({ a: 1 });\n  }\n  return save;\n}\n";
        let expected = "import { createClient } from '@/lib/supabase/server';\nexport default async function Page() {\n  async function save(form: FormData) {\n    'use server';\n    const supabase = await createClient();\n    await supabase.from('t').insert({ a: 1 });\n  }\n  return save;\n}\n";
        let result = run(input, ContextHint::Server);
        assert_eq!(result.new_text, expected);
    }

    #[test]
    fn test_missing_context_defaults_to_server_with_warning() {
        let input = format!(
            "{}export async function load() {{\n  return supabase.from('a');\n}}\n",
            SERVER_IMPORT
        );
        let result = run(&input, ContextHint::Unknown);
        assert!(has_code(&result, SYNC_AMBIGUOUS_CONTEXT));
        assert!(result
            .new_text
            .contains("  const supabase = await createClient();\n  return supabase.from('a');"));
    }

    #[test]
    fn test_file_without_handle_is_untouched() {
        let input = "export const x = { a: [1, 2, 3] };\n// supabase.from('x') is mentioned in a comment\n";
        let result = run(input, ContextHint::Unknown);
        assert_eq!(result.new_text, input);
        assert!(result.diagnostics.is_empty());
    }
}

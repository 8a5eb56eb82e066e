//! Source generation for benchmark artifacts.
//!
//! Two artifacts are generated per snippet:
//!
//! - the *timing* artifact runs the snippet in a tight loop and writes only
//!   the elapsed seconds to stderr, or a four-line fault record
//!   (`severity`, `message`, `file`, `line`) and exits with `severity`;
//! - the *whole* artifact runs setup, snippet and teardown once, untouched,
//!   so the snippet's real output can be inspected.
//!
//! Nothing here touches the filesystem.

use std::fmt::Write as _;

use crate::config::HarnessConfig;
use crate::Wrapping;

/// Renders artifact source for one scripting runtime.
///
/// Implementations must be pure: the same snippet and config always render
/// the same bytes, since the cache keys artifacts by their inputs alone.
pub trait SnippetCompiler: Send + Sync {
    /// Short tag used in artifact file names. Must be unique per compiler
    /// sharing a cache directory.
    fn name(&self) -> &str;

    fn build_timing(&self, snippet: &str, config: &HarnessConfig) -> String;

    fn build_whole(&self, snippet: &str, config: &HarnessConfig) -> String;
}

/// PHP CLI scripts, run through `#!/usr/bin/env php`.
#[derive(Clone, Copy, Debug, Default)]
pub struct PhpCompiler;

const PHP_PROLOGUE: &str = "#!/usr/bin/env php\n<?php\n";

const PHP_FAULT_HANDLERS: &str = r#"ini_set('display_errors', '0');
ini_set('log_errors', '0');

set_error_handler(function () {
    fwrite(STDERR, implode(PHP_EOL, array_slice(func_get_args(), 0, 4)));
    exit(func_get_arg(0));
});

set_exception_handler(function ($e) {
    fwrite(STDERR, implode(PHP_EOL, [E_ERROR, $e->getMessage(), $e->getFile(), $e->getLine()]));
    exit(E_ERROR);
});

register_shutdown_function(function () {
    $e = error_get_last();
    if ($e !== null && ($e['type'] & (E_ERROR | E_CORE_ERROR | E_COMPILE_ERROR | E_RECOVERABLE_ERROR))) {
        fwrite(STDERR, implode(PHP_EOL, [$e['type'], $e['message'], $e['file'], $e['line']]));
        exit($e['type']);
    }
});
"#;

impl PhpCompiler {
    fn timing_body(out: &mut String, indent: &str, snippet: &str, config: &HarnessConfig) {
        // `$_` and `$__` are the only names the harness claims; in scoped
        // mode they live in the closure, not in the snippet's global scope.
        let lines = [
            "ob_start();".to_string(),
            String::new(),
            format!("{};", config.set_up()),
            String::new(),
            "$_ = microtime(true);".to_string(),
            format!("for ($__ = {}; --$__; ) {{", config.loop_count()),
            format!("    {snippet};"),
            "}".to_string(),
            "$_ = microtime(true) - $_;".to_string(),
            String::new(),
            format!("{};", config.tear_down()),
            String::new(),
            "ob_end_clean();".to_string(),
            String::new(),
            "fwrite(STDERR, $_);".to_string(),
        ];
        for line in lines {
            if line.is_empty() {
                out.push('\n');
            } else {
                let _ = writeln!(out, "{indent}{line}");
            }
        }
    }
}

impl SnippetCompiler for PhpCompiler {
    fn name(&self) -> &str {
        "php"
    }

    fn build_timing(&self, snippet: &str, config: &HarnessConfig) -> String {
        let mut out = String::with_capacity(512 + snippet.len());
        out.push_str(PHP_PROLOGUE);
        out.push_str(PHP_FAULT_HANDLERS);
        out.push('\n');

        match config.wrapping() {
            Wrapping::Scoped => {
                out.push_str("call_user_func(function () {\n");
                Self::timing_body(&mut out, "    ", snippet, config);
                out.push_str("});\n");
            }
            Wrapping::Flat => Self::timing_body(&mut out, "", snippet, config),
        }
        out
    }

    fn build_whole(&self, snippet: &str, config: &HarnessConfig) -> String {
        format!(
            "{PHP_PROLOGUE}{};\n\n{snippet};\n\n{};\n",
            config.set_up(),
            config.tear_down()
        )
    }
}

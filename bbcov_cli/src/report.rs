use bbcov_core::{
    BatchReport, CoverageModel, CoverageSummary, DeclaredSpanSource, FunctionKey, FunctionSource,
    highlight,
};
use std::io::Write;
use std::path::Path;

/// Batch totals. `Crashes` counts every non-zero exit, which includes the
/// status 255 the coverage runtimes exit with.
pub fn write_batch_report(out: &mut impl Write, report: &BatchReport) -> anyhow::Result<()> {
    writeln!(
        out,
        "Runs: {}, Merged: {}, Untraced: {}, Merge failures: {}",
        report.runs, report.merged, report.untraced, report.merge_failures
    )?;
    writeln!(
        out,
        "Crashes: {}, Timeouts: {}, New blocks: {}",
        report.crashes, report.timeouts, report.blocks_newly_hit
    )?;
    Ok(())
}

pub fn write_summary(out: &mut impl Write, summary: &CoverageSummary) -> anyhow::Result<()> {
    for func in &summary.functions {
        writeln!(
            out,
            "{}: {}/{} blocks ({:.2}%)",
            func.function,
            func.covered_blocks,
            func.total_blocks,
            func.ratio * 100.0
        )?;
    }
    writeln!(
        out,
        "Total: {}/{} blocks ({:.2}%)",
        summary.covered_blocks,
        summary.total_blocks,
        summary.ratio() * 100.0
    )?;
    Ok(())
}

/// Per-block listing: `id : hit count : lines`, grouped by function.
pub fn write_blocks(
    out: &mut impl Write,
    model: &CoverageModel,
    function: &FunctionKey,
) -> anyhow::Result<()> {
    let blocks = model
        .get(function)
        .ok_or_else(|| anyhow::anyhow!("Unknown function {function}"))?;
    writeln!(out, "{function} :")?;
    for bb in blocks {
        let lines: Vec<String> = bb
            .lines
            .iter()
            .map(|loc| format!("{}:{}", loc.file, loc.line))
            .collect();
        let lines = lines.join(", ");
        writeln!(out, "\t{} : {} : [{lines}]", bb.id, bb.hit_count)?;
    }
    Ok(())
}

pub fn write_ratio(
    out: &mut impl Write,
    model: &CoverageModel,
    function: &FunctionKey,
) -> anyhow::Result<()> {
    let ratio = model.coverage_ratio(function)?;
    writeln!(out, "{function}: {:.2}% of blocks covered", ratio * 100.0)?;
    Ok(())
}

/// Ratio followed by the function's source, colored by line class.
pub fn write_function(
    out: &mut impl Write,
    model: &CoverageModel,
    function: &FunctionKey,
    source_dir: &Path,
) -> anyhow::Result<()> {
    write_ratio(out, model, function)?;
    let classes = model.classify(function)?;
    let lines = DeclaredSpanSource::new(model, source_dir).function_source(function)?;
    if lines.is_empty() {
        writeln!(out, "(no source lines declared for {function})")?;
        return Ok(());
    }
    write!(out, "{}", highlight(&classes, &lines))?;
    Ok(())
}

pub fn write_line_origins(
    out: &mut impl Write,
    model: &CoverageModel,
    function: &FunctionKey,
    line: u32,
) -> anyhow::Result<()> {
    let origins = model.files_covering_line(function, line);
    if origins.is_empty() {
        writeln!(out, "No input covered line {line} of {function}")?;
    } else {
        writeln!(out, "Inputs covering line {line} of {function}:")?;
        for origin in origins {
            writeln!(out, "  {origin}")?;
        }
    }
    Ok(())
}

pub fn write_functions_at(
    out: &mut impl Write,
    model: &CoverageModel,
    file: &str,
    line: u32,
) -> anyhow::Result<()> {
    let functions = model.functions_at(file, line);
    if functions.is_empty() {
        writeln!(out, "No function declares {file}:{line}")?;
    } else {
        writeln!(out, "Functions declaring {file}:{line}:")?;
        for function in functions {
            writeln!(out, "  {function}")?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bbcov_core::{ProfileRecord, StaticMap, TraceRecord};

    fn model() -> CoverageModel {
        let mut model = StaticMap::parse(
            r#"{ "parse.c": [ { "Function": "parse", "BasicBlocks": [
                { "Id": 0, "Coverage": [ { "File": "parse.c", "Line": 1 } ] },
                { "Id": 1, "Coverage": [ { "File": "parse.c", "Line": 2 } ] } ] } ] }"#,
        )
        .unwrap()
        .to_model();
        let mut record = ProfileRecord::new();
        record.insert("parse.c", "parse", vec![5, 0]);
        model.merge(&TraceRecord::Profile(record), "seedA").unwrap();
        model
    }

    fn render(f: impl FnOnce(&mut Vec<u8>) -> anyhow::Result<()>) -> String {
        let mut out = Vec::new();
        f(&mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn summary_lists_functions_and_total() {
        let model = model();
        let text = render(|out| write_summary(out, &model.summarize()));
        assert_eq!(
            text,
            "parse.c | parse: 1/2 blocks (50.00%)\nTotal: 1/2 blocks (50.00%)\n"
        );
    }

    #[test]
    fn blocks_show_hit_counts() {
        let model = model();
        let key = FunctionKey::new("parse", "parse.c");
        let text = render(|out| write_blocks(out, &model, &key));
        assert_eq!(
            text,
            "parse.c | parse :\n\t0 : 5 : [parse.c:1]\n\t1 : 0 : [parse.c:2]\n"
        );
    }

    #[test]
    fn line_origins() {
        let model = model();
        let key = FunctionKey::new("parse", "parse.c");
        let covered = render(|out| write_line_origins(out, &model, &key, 1));
        assert!(covered.contains("  seedA\n"));
        let uncovered = render(|out| write_line_origins(out, &model, &key, 2));
        assert!(uncovered.starts_with("No input"));
    }

    #[test]
    fn functions_at_line() {
        let model = model();
        let text = render(|out| write_functions_at(out, &model, "parse.c", 1));
        assert_eq!(text, "Functions declaring parse.c:1:\n  parse.c | parse\n");
        let text = render(|out| write_functions_at(out, &model, "other.c", 1));
        assert_eq!(text, "No function declares other.c:1\n");
    }

    #[test]
    fn batch_report_counts() {
        let report = BatchReport {
            runs: 3,
            merged: 2,
            untraced: 1,
            crashes: 3,
            ..BatchReport::default()
        };
        let text = render(|out| write_batch_report(out, &report));
        assert_eq!(
            text,
            "Runs: 3, Merged: 2, Untraced: 1, Merge failures: 0\n\
             Crashes: 3, Timeouts: 0, New blocks: 0\n"
        );
    }

    #[test]
    fn function_with_source() {
        let model = model();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("parse.c"), "a();\nb();\n").unwrap();
        let key = FunctionKey::new("parse", "parse.c");
        let text = render(|out| write_function(out, &model, &key, dir.path()));
        let header = "parse.c | parse: 50.00% of blocks covered\n";
        assert!(text.starts_with(header));
        assert!(text.contains("\x1b[92m1:\ta();\x1b[0m"));
        assert!(text.contains("\x1b[91m2:\tb();\x1b[0m"));
    }
}

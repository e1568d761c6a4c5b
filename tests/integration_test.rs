/// End-to-end integration tests for the paperscan pipeline.
///
/// Tests the complete flow with a scripted provider:
///   Discovery → Analyze → CSV/JSON output → Stats
use std::fs;
use std::path::Path;

use chrono::{Local, TimeZone};
use lopdf::content::{Content, Operation};
use lopdf::{Document, Object, Stream, dictionary};
use paperscan::config::{AnalysisMode, Config};
use paperscan::document::discover_pdfs;
use paperscan::output::OutputPaths;
use paperscan::output::csv::BOM;
use paperscan::pipeline::{Analyzer, FailureKind};
use paperscan::provider::mock::ScriptedProvider;
use paperscan::response::{ERROR_PLACEHOLDER, MISSING_PLACEHOLDER, NOT_FOUND_PLACEHOLDER};
use paperscan::schema::PromptBook;
use paperscan::stats::{self, ResultTable};
use serde_json::Value;
use tempfile::tempdir;

fn test_config(mode: AnalysisMode) -> Config {
    Config {
        mode,
        call_delay_secs: 0,
        write_retry_delay_secs: 0,
        max_retries: 2,
        ..Config::default()
    }
}

fn outputs(dir: &Path) -> OutputPaths {
    let started = Local.with_ymd_and_hms(2025, 5, 5, 10, 52, 22).unwrap();
    OutputPaths::new(dir, started)
}

fn read_csv(path: &Path) -> ResultTable {
    let bytes = fs::read(path).unwrap();
    assert!(bytes.starts_with(BOM), "CSV must start with a BOM");
    ResultTable::load(path).unwrap()
}

/// A one-page PDF whose text layer is `lines`.
fn write_pdf(path: &Path, lines: &[&str]) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut operations = vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), 12.into()]),
        Operation::new("Td", vec![72.into(), 720.into()]),
    ];
    for line in lines {
        operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
        operations.push(Operation::new("Td", vec![0.into(), (-16).into()]));
    }
    operations.push(Operation::new("ET", vec![]));
    let content = Content { operations };

    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
        "Resources" => resources_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

/// Upload mode over three papers: one clean answer, one partial, one garbage.
#[test]
fn test_upload_batch_writes_one_row_per_document() {
    let temp = tempdir().unwrap();
    let input = temp.path().join("input");
    fs::create_dir_all(&input).unwrap();
    for name in ["a_clean.pdf", "b_partial.pdf", "c_garbage.pdf"] {
        fs::write(input.join(name), b"%PDF-1.4 placeholder").unwrap();
    }
    fs::write(input.join("readme.txt"), "not a paper").unwrap();

    let book = PromptBook::builtin().unwrap();
    let fields = book.schema.field_names();
    let clean: serde_json::Map<String, Value> = fields
        .iter()
        .map(|f| (f.to_string(), Value::String(format!("{f} 답변"))))
        .collect();
    let clean = format!("```json\n{}\n```", Value::Object(clean));

    let provider = ScriptedProvider::new()
        .reply(clean)
        .reply(r#"Result: {"핵심 내용": "요약", "고객 세그먼트": "중소기업",}"#)
        .reply("죄송합니다. 분석할 수 없습니다.");
    let config = test_config(AnalysisMode::Upload);
    let analyzer = Analyzer::new(&provider, &book, &config);

    let files = discover_pdfs(&input).unwrap();
    assert_eq!(files.len(), 3);
    let paths = outputs(&temp.path().join("result"));
    let summary = analyzer.run_batch(&files, &paths).unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.recovered, 2);
    assert_eq!(summary.persist_failed, 0);
    assert_eq!(summary.failures.len(), 2);
    assert_eq!(summary.failures[0].1, FailureKind::SchemaGap);
    assert_eq!(summary.failures[1].1, FailureKind::ResponseShape);
    assert!(
        paths
            .csv
            .ends_with("논문분석_결과_20250505_105222.csv")
    );

    let table = read_csv(&paths.csv);
    assert_eq!(table.headers.len(), fields.len() + 2);
    assert_eq!(table.headers[0], "논문 제목");
    assert_eq!(table.headers[fields.len() + 1], "오류");
    assert_eq!(table.rows.len(), 3);

    let titles = table.column("논문 제목").unwrap();
    assert_eq!(titles, vec!["a_clean.pdf", "b_partial.pdf", "c_garbage.pdf"]);
    let errors = table.column("오류").unwrap();
    assert_eq!(errors[0], "");
    assert!(errors[1].starts_with("필드 누락"));
    assert_eq!(errors[2], "JSON 추출 실패");

    let segments = table.column("고객 세그먼트").unwrap();
    assert_eq!(segments, vec!["고객 세그먼트 답변", "중소기업", NOT_FOUND_PLACEHOLDER]);
    assert_eq!(table.column("채널").unwrap()[1], MISSING_PLACEHOLDER);

    let json: Value = serde_json::from_str(&fs::read_to_string(&paths.json).unwrap()).unwrap();
    let rows = json.as_array().unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["핵심 내용"], "핵심 내용 답변");
    assert_eq!(summary.json_path.as_deref(), Some(paths.json.as_path()));

    // Each prompt went out with the upload.
    assert_eq!(provider.uploads().len(), 3);
    assert!(provider.prompts()[0].contains("\"가치 제안\""));
}

/// A second batch into the same CSV appends rows without a second header.
#[test]
fn test_appending_keeps_single_header() {
    let temp = tempdir().unwrap();
    let input = temp.path().join("input");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join("paper.pdf"), b"x").unwrap();

    let book = PromptBook::builtin().unwrap();
    let mut config = test_config(AnalysisMode::Upload);
    config.json_output = false;
    let paths = outputs(temp.path());
    let files = discover_pdfs(&input).unwrap();

    for _ in 0..3 {
        let provider = ScriptedProvider::new().reply(r#"{"핵심 내용": "x"}"#);
        let analyzer = Analyzer::new(&provider, &book, &config);
        let summary = analyzer.run_batch(&files, &paths).unwrap();
        assert!(summary.json_path.is_none());
    }

    let text = fs::read_to_string(&paths.csv).unwrap();
    assert_eq!(text.matches("논문 제목").count(), 1);
    assert_eq!(text.matches('\u{FEFF}').count(), 1);
    assert_eq!(read_csv(&paths.csv).rows.len(), 3);
    assert!(!paths.json.exists());
}

/// Upload and remote failures still produce rows.
#[test]
fn test_failures_produce_placeholder_rows() {
    let temp = tempdir().unwrap();
    let input = temp.path().join("input");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join("paper.pdf"), b"x").unwrap();
    let files = discover_pdfs(&input).unwrap();
    let book = PromptBook::builtin().unwrap();
    let config = test_config(AnalysisMode::Upload);

    let provider = ScriptedProvider::new().failing_uploads();
    let paths = outputs(&temp.path().join("upload"));
    Analyzer::new(&provider, &book, &config)
        .run_batch(&files, &paths)
        .unwrap();
    let table = read_csv(&paths.csv);
    assert_eq!(table.column("오류").unwrap(), vec!["파일 업로드 실패"]);
    assert_eq!(table.column("핵심 내용").unwrap(), vec![ERROR_PLACEHOLDER]);

    let provider = ScriptedProvider::new();
    let paths = outputs(&temp.path().join("remote"));
    Analyzer::new(&provider, &book, &config)
        .run_batch(&files, &paths)
        .unwrap();
    let table = read_csv(&paths.csv);
    assert_eq!(table.column("오류").unwrap(), vec!["API 응답 없음"]);
    assert_eq!(provider.prompts().len(), 2);
}

/// An unwritable CSV is logged and counted; the batch still finishes.
#[test]
fn test_persistence_failure_continues() {
    let temp = tempdir().unwrap();
    let input = temp.path().join("input");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join("one.pdf"), b"x").unwrap();
    fs::write(input.join("two.pdf"), b"x").unwrap();
    let files = discover_pdfs(&input).unwrap();

    let paths = outputs(temp.path());
    // A directory where the CSV should go makes every append fail.
    fs::create_dir_all(&paths.csv).unwrap();

    let book = PromptBook::builtin().unwrap();
    let config = test_config(AnalysisMode::Upload);
    let provider = ScriptedProvider::new().with_fallback(r#"{"핵심 내용": "x"}"#);
    let summary = Analyzer::new(&provider, &book, &config)
        .run_batch(&files, &paths)
        .unwrap();

    assert_eq!(summary.total, 2);
    assert_eq!(summary.persist_failed, 2);
    let kinds: Vec<FailureKind> = summary.failures.iter().map(|(_, k)| *k).collect();
    assert_eq!(
        kinds,
        vec![
            FailureKind::SchemaGap,
            FailureKind::Persistence,
            FailureKind::SchemaGap,
            FailureKind::Persistence,
        ]
    );
    let json: Value = serde_json::from_str(&fs::read_to_string(&paths.json).unwrap()).unwrap();
    assert_eq!(json.as_array().unwrap().len(), 2);
    assert!(json[0]["오류"].as_str().unwrap().starts_with("필드 누락"));
}

/// Chunked mode: unreadable PDFs get error rows, readable ones are chunked.
#[test]
fn test_chunked_mode_end_to_end() {
    let temp = tempdir().unwrap();
    let input = temp.path().join("input");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join("broken.pdf"), b"this is not a pdf").unwrap();
    write_pdf(
        &input.join("paper.pdf"),
        &["Generative AI Business Models", "Value creation with data"],
    );

    let book = PromptBook::builtin().unwrap();
    let config = test_config(AnalysisMode::Chunked);
    let provider = ScriptedProvider::new().with_fallback(
        r#"```json
{"results": [{"question_id": 1, "answer": "AI BM 연구"}, {"question_id": 5, "answer": "효율성"}]}
```"#,
    );
    let files = discover_pdfs(&input).unwrap();
    let paths = outputs(&temp.path().join("result"));
    let summary = Analyzer::new(&provider, &book, &config)
        .run_batch(&files, &paths)
        .unwrap();
    assert_eq!(summary.total, 2);
    assert_eq!(summary.failures.len(), 1);
    assert!(summary.failures[0].0.ends_with("broken.pdf"));
    assert_eq!(summary.failures[0].1, FailureKind::Transport);

    let table = read_csv(&paths.csv);
    let errors = table.column("오류").unwrap();
    assert_eq!(errors[0], "텍스트 추출 실패");
    assert_eq!(table.column("핵심 내용").unwrap()[0], ERROR_PLACEHOLDER);

    assert_eq!(errors[1], "");
    assert_eq!(table.column("핵심 내용").unwrap()[1], "AI BM 연구");
    assert_eq!(table.column("가치 제안").unwrap()[1], "효율성");
    assert_eq!(table.column("채널").unwrap()[1], NOT_FOUND_PLACEHOLDER);

    let prompts = provider.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Generative AI"));
}

/// Stats over a finished result file.
#[test]
fn test_stats_on_result_csv() {
    let temp = tempdir().unwrap();
    let input = temp.path().join("input");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join("a.pdf"), b"x").unwrap();
    fs::write(input.join("b.pdf"), b"x").unwrap();

    let book = PromptBook::builtin().unwrap();
    let config = test_config(AnalysisMode::Upload);
    let provider = ScriptedProvider::new()
        .reply(r#"{"AI의 특징": "예측, 자동화", "비즈니스 모델 캔버스(BMC) 활용 여부": "Y", "추가영역 제시": "데이터 자원과 가치 제안"}"#)
        .reply(r#"{"AI의 특징": "예측", "비즈니스 모델 캔버스(BMC) 활용 여부": "N"}"#);
    let files = discover_pdfs(&input).unwrap();
    let paths = outputs(temp.path());
    Analyzer::new(&provider, &book, &config)
        .run_batch(&files, &paths)
        .unwrap();

    let table = ResultTable::load(&paths.csv).unwrap();
    let terms = stats::term_frequencies(&table.column("AI의 특징").unwrap());
    assert_eq!(terms[0], ("예측".to_string(), 2));

    let flags = stats::yes_no_counts(&table.column("비즈니스 모델 캔버스(BMC) 활용 여부").unwrap());
    assert_eq!(flags, (1, 1, 0));

    let bmc = stats::bmc_element_counts(&table.column("추가영역 제시").unwrap());
    assert!(bmc.contains(&("가치 제안".to_string(), 1)));
    assert!(bmc.contains(&(stats::AI_SPECIFIC_GROUP.to_string(), 1)));
}

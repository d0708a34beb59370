//! Integration tests running a real worker behind the engine.

use std::sync::Arc;

use futures::future::join_all;
use ptimer_asset::stream_from_bytes;
use ptimer_codec::{DecodeError, EncodeError};
use ptimer_document::{Document, NotEncodable, Step};
use ptimer_engine::{AssetResolver, Engine, EngineConfig, EngineError, EngineState, Session};

const SAMPLE_WAV: &[u8] = b"RIFF\x24\x00\x00\x00WAVEfmt ";

async fn engine() -> Arc<Engine> {
  let engine = Engine::spawn(EngineConfig::default()).await.unwrap();
  Arc::new(engine)
}

fn step(id: i64, sound: Option<i64>) -> Step {
  Step {
    id,
    title: format!("Step {}", id),
    description: None,
    sound,
    duration_seconds: Some(60),
  }
}

fn timer(resolver: &AssetResolver, title: &str) -> Document {
  let mut doc = Document::new(title, "en-GB");
  doc.metadata.description = Some("Desc".to_string());
  doc.steps.push(step(0, Some(1)));
  doc.assets.push(ptimer_document::Asset {
    id: 1,
    name: "sample.wav".to_string(),
    mime: "audio/wav".to_string(),
    notice: None,
    data: resolver.materialize(1, SAMPLE_WAV, "audio/wav"),
  });
  doc
}

#[tokio::test]
async fn test_spawn_completes_handshake() {
  let engine = engine().await;

  assert_eq!(engine.state(), EngineState::Ready);
  assert!(engine.sqlite_version().unwrap().starts_with('3'));
}

#[tokio::test]
async fn test_compile_then_parse() {
  let engine = engine().await;
  let resolver = AssetResolver::new();
  let doc = timer(&resolver, "New Timer");

  let compiled = engine.compile(&doc, &resolver).await.unwrap();
  assert_eq!(compiled.file_name, "New Timer.ptimer");
  assert_eq!(compiled.mime, "application/x-ptimer");

  let parsed = engine.parse_bytes(compiled.data, &resolver).await.unwrap();
  assert_eq!(parsed.metadata, doc.metadata);
  assert_eq!(parsed.steps, doc.steps);
  assert_eq!(parsed.assets.len(), 1);

  // Decoding re-materialized asset 1, superseding the original reference
  assert!(!resolver.is_live(&doc.assets[0].data));
  let data = resolver
    .dereference(&parsed.assets[0].data)
    .await
    .unwrap();
  assert_eq!(&data[..], SAMPLE_WAV);
}

#[tokio::test]
async fn test_compile_without_steps_is_not_encodable() {
  let engine = engine().await;
  let doc = Document::new("Empty", "en");

  let result = engine.compile(&doc, &AssetResolver::new()).await;

  assert!(matches!(
    result,
    Err(EngineError::NotEncodable(NotEncodable::NoSteps))
  ));
}

#[tokio::test]
async fn test_parse_garbage_is_malformed() {
  let engine = engine().await;

  let resolver = AssetResolver::new();
  let result = engine
    .parse_bytes(&b"definitely not a container"[..], &resolver)
    .await;

  assert!(matches!(
    result,
    Err(EngineError::Decode(DecodeError::Malformed { .. }))
  ));
  // A failed request does not take the engine down
  assert_eq!(engine.state(), EngineState::Ready);
}

#[tokio::test]
async fn test_concurrent_compiles() {
  let engine = engine().await;

  let docs: Vec<Document> = (0..4)
    .map(|i| {
      let mut doc = Document::new(format!("Timer {}", i), "en");
      doc.steps.push(step(i, None));
      doc
    })
    .collect();

  let resolver = AssetResolver::new();
  let results = join_all(docs.iter().map(|doc| engine.compile(doc, &resolver))).await;

  for (i, result) in results.into_iter().enumerate() {
    let compiled = result.unwrap();
    assert_eq!(compiled.file_name, format!("Timer {}.ptimer", i));

    let parsed = engine.parse_bytes(compiled.data, &resolver).await.unwrap();
    assert_eq!(parsed.metadata.title, format!("Timer {}", i));
    assert_eq!(parsed.steps[0].id, i as i64);
  }
}

#[tokio::test]
async fn test_parse_file() {
  let engine = engine().await;
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("timer.ptimer");

  let resolver = AssetResolver::new();
  let compiled = engine
    .compile(&timer(&resolver, "On Disk"), &resolver)
    .await
    .unwrap();
  tokio::fs::write(&path, &compiled.data).await.unwrap();

  let parsed = engine.parse_file(&path, &resolver).await.unwrap();
  assert_eq!(parsed.metadata.title, "On Disk");

  let missing = engine
    .parse_file(dir.path().join("missing.ptimer"), &resolver)
    .await;
  assert!(matches!(missing, Err(EngineError::Io(_))));
}

#[tokio::test]
async fn test_session_replacing_asset_revokes_previous() {
  let engine = engine().await;
  let mut session = Session::new(engine.clone());
  session.create("Session", "en").steps.push(step(0, Some(1)));

  let first = session
    .upload_asset(1, "a.wav", "audio/wav", &b"first"[..])
    .unwrap();
  let second = session
    .upload_asset(1, "b.wav", "audio/wav", &b"second"[..])
    .unwrap();

  assert!(!session.resolver().is_live(&first));
  assert!(session.resolver().is_live(&second));

  let doc = session.document().unwrap();
  assert_eq!(doc.assets.len(), 1);
  assert_eq!(doc.assets[0].name, "b.wav");
  assert_eq!(doc.assets[0].data, second);
}

#[tokio::test]
async fn test_session_export_supersedes_previous_output() {
  let engine = engine().await;
  let mut session = Session::new(engine.clone());
  session.create("Export", "en").steps.push(step(0, None));

  session.export().await.unwrap();
  let first = session.output().cloned().unwrap();

  session.document_mut().unwrap().metadata.title = "Export 2".to_string();
  let compiled = session.export().await.unwrap();
  let second = session.output().cloned().unwrap();

  assert!(!session.resolver().is_live(&first));
  assert_eq!(
    session.resolver().dereference(&second).await.unwrap(),
    compiled.data
  );
  assert_eq!(
    session.resolver().mime(&second).as_deref(),
    Some("application/x-ptimer")
  );
}

#[tokio::test]
async fn test_session_failed_export_keeps_previous_output() {
  let engine = engine().await;
  let dir = tempfile::tempdir().unwrap();
  let mut session = Session::new(engine.clone());
  session.create("Lazy", "en").steps.push(step(0, Some(1)));

  session
    .upload_asset(1, "a.wav", "audio/wav", SAMPLE_WAV)
    .unwrap();
  session.export().await.unwrap();
  let previous = session.output().cloned().unwrap();

  session
    .attach_file(1, "gone.wav", "audio/wav", dir.path().join("gone.wav"))
    .unwrap();
  let result = session.export().await;

  assert!(matches!(
    result,
    Err(EngineError::Encode(EncodeError::AssetUnavailable { asset_id: 1, .. }))
  ));
  assert_eq!(session.output(), Some(&previous));
  assert!(session.resolver().is_live(&previous));
}

#[tokio::test]
async fn test_session_open_and_discard_revoke_references() {
  let engine = engine().await;
  let resolver = AssetResolver::new();
  let bytes = engine
    .compile(&timer(&resolver, "Opened"), &resolver)
    .await
    .unwrap()
    .data;

  let mut session = Session::new(engine.clone());
  session.create("Draft", "en").steps.push(step(0, Some(2)));
  let draft_asset = session
    .upload_asset(2, "draft.wav", "audio/wav", &b"draft"[..])
    .unwrap();

  let opened = session.open(stream_from_bytes(bytes)).await.unwrap();
  assert_eq!(opened.metadata.title, "Opened");
  let opened_asset = opened.assets[0].data.clone();

  assert!(!session.resolver().is_live(&draft_asset));
  assert!(session.resolver().is_live(&opened_asset));

  session.export().await.unwrap();
  let output = session.output().cloned().unwrap();

  session.discard();

  assert!(session.document().is_none());
  assert!(session.output().is_none());
  assert!(!session.resolver().is_live(&opened_asset));
  assert!(!session.resolver().is_live(&output));
}

#[tokio::test]
async fn test_session_requires_document() {
  let engine = engine().await;
  let mut session = Session::new(engine);

  assert!(matches!(
    session.upload_asset(1, "a.wav", "audio/wav", SAMPLE_WAV),
    Err(EngineError::NoDocument)
  ));
  assert!(matches!(
    session.export().await,
    Err(EngineError::NoDocument)
  ));
}

#[tokio::test]
async fn test_two_sessions_keep_their_own_references() {
  let engine = engine().await;
  let resolver = AssetResolver::new();
  let bytes = engine
    .compile(&timer(&resolver, "Shared"), &resolver)
    .await
    .unwrap()
    .data;

  let mut editing = Session::new(engine.clone());
  editing.create("Editing", "en").steps.push(step(0, Some(1)));
  let uploaded = editing
    .upload_asset(1, "mine.wav", "audio/wav", &b"mine"[..])
    .unwrap();

  // Opening asset 1 elsewhere on the same engine leaves this binding alone
  let mut viewing = Session::new(engine.clone());
  let opened = viewing.open(stream_from_bytes(bytes)).await.unwrap();
  let opened_asset = opened.assets[0].data.clone();

  assert!(editing.resolver().is_live(&uploaded));
  assert!(!editing.resolver().is_live(&opened_asset));
  assert!(viewing.resolver().is_live(&opened_asset));

  let compiled = editing.export().await.unwrap();
  let parsed = engine
    .parse_bytes(compiled.data, &AssetResolver::new())
    .await
    .unwrap();
  assert_eq!(parsed.metadata.title, "Editing");

  viewing.discard();
  assert!(editing.resolver().is_live(&uploaded));
  assert_eq!(
    &editing.resolver().dereference(&uploaded).await.unwrap()[..],
    b"mine"
  );
}

#[tokio::test]
async fn test_session_replacing_asset_clears_notice() {
  let engine = engine().await;
  let mut session = Session::new(engine);
  session.create("Notice", "en").steps.push(step(0, Some(1)));

  session
    .upload_asset(1, "a.wav", "audio/wav", &b"first"[..])
    .unwrap();
  session.document_mut().unwrap().assets[0].notice = Some("CC-BY Someone".to_string());

  session
    .upload_asset(1, "b.wav", "audio/wav", &b"second"[..])
    .unwrap();

  let doc = session.document().unwrap();
  assert_eq!(doc.assets[0].name, "b.wav");
  assert_eq!(doc.assets[0].notice, None);
}

//! Parameter input shapes, mock overrides, and adjacency inspection.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use lobelia::{
  BoxError, Context, Dependency, Params, ParamsKey, Token, get_adjacency_list, run,
};
use serde_json::json;

fn greeter() -> Dependency {
  Dependency::transient("greeter")
    .depends_on(["greeting"])
    .provides(|args| async move {
      Ok::<_, BoxError>(json!(format!("{}!", args[0].as_str().unwrap())))
    })
}

#[tokio::test]
async fn test_object_params_satisfy_placeholders() {
  let value = run(&greeter(), json!({ "greeting": "hi" }), None).await.unwrap();
  assert_eq!(value, json!("hi!"));
}

#[tokio::test]
async fn test_pair_list_params_satisfy_placeholders() {
  let value = run(&greeter(), json!([["greeting", "hi"]]), None).await.unwrap();
  assert_eq!(value, json!("hi!"));
}

#[tokio::test]
async fn test_map_params_satisfy_placeholders() {
  let mut params = HashMap::new();
  params.insert("greeting".to_string(), json!("hi"));
  let value = run(&greeter(), params, None).await.unwrap();
  assert_eq!(value, json!("hi!"));
}

#[tokio::test]
async fn test_typed_params_builder() {
  let params = Params::new().with("greeting", json!("hi"));
  let value = run(&greeter(), params, None).await.unwrap();
  assert_eq!(value, json!("hi!"));
}

#[tokio::test]
async fn test_malformed_params_fail_eagerly() {
  for bad in [json!(42), json!("flat"), json!([{ "greeting": "hi" }])] {
    let err = run(&greeter(), bad, None).await.unwrap_err();
    assert_eq!(
      err.to_string(),
      "Must be either a Map, an array of key/value pairs or an object"
    );
  }
}

#[tokio::test]
async fn test_token_placeholders_resolve_by_identity() {
  let session = Token::new("session");
  let probe = Dependency::transient("probe")
    .depends_on([&session])
    .provides(|args| async move { Ok::<_, BoxError>(args.into_iter().next().unwrap()) });

  let params = Params::new().with(&session, json!("s-1"));
  assert_eq!(run(&probe, params, None).await.unwrap(), json!("s-1"));

  // A different token with the same label does not satisfy the placeholder.
  let imposter = Token::new("session");
  let params = Params::new().with(&imposter, json!("s-2"));
  let err = run(&probe, params, None).await.unwrap_err();
  assert_eq!(err.to_string(), "Missing argument: session");
}

#[tokio::test]
async fn test_node_keys_act_as_mock_overrides() {
  let calls = Arc::new(AtomicUsize::new(0));
  let real = {
    let calls = Arc::clone(&calls);
    Dependency::transient("real").provides(move |_| {
      let calls = Arc::clone(&calls);
      async move {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok::<_, BoxError>(json!("real"))
      }
    })
  };
  let consumer = Dependency::transient("consumer")
    .depends_on([&real])
    .provides(|args| async move { Ok::<_, BoxError>(args.into_iter().next().unwrap()) });

  let context = Context::new("test");
  let params = Params::new().with(&real, json!("mocked"));
  let value = run(&consumer, params, Some(&context)).await.unwrap();

  assert_eq!(value, json!("mocked"));
  assert_eq!(calls.load(Ordering::SeqCst), 0);
  assert!(!context.has(&real));
  assert!(context.has(&consumer));
}

#[tokio::test]
async fn test_params_key_conversions() {
  let node = Dependency::transient("node");
  let token = Token::new("token");
  assert!(matches!(ParamsKey::from("name"), ParamsKey::Str(_)));
  assert!(matches!(ParamsKey::from(&token), ParamsKey::Token(_)));
  assert!(matches!(ParamsKey::from(&node), ParamsKey::Dependency(_)));
}

#[tokio::test]
async fn test_adjacency_list_covers_placeholders() {
  let a = Dependency::transient("a").provides(|_| async { Ok::<_, BoxError>(json!("A")) });
  let b = Dependency::transient("b")
    .depends_on(vec![a.clone(), Dependency::parameter("greeting")])
    .provides(|args| async move {
      Ok::<_, BoxError>(json!(format!("{} {}", args[1].as_str().unwrap(), args[0].as_str().unwrap())))
    });

  let closure = get_adjacency_list([&b]);
  assert_eq!(closure.len(), 3);
  assert_eq!(closure[0], b);

  let context = Context::new("test");
  run(&b, json!({ "greeting": "hello" }), Some(&context)).await.unwrap();
  // Members are the real nodes; the closure still reaches the placeholder.
  assert_eq!(context.size(), 2);
  assert_eq!(context.get_adjacency_list().len(), 3);
}

//! Concurrent authorization while the policy set changes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use warden_policy::{
    AccessRequest, Policy, PolicyAuthorizer, PolicySet, Resource, ResourceMatcher, Subject,
    SubjectMatcher,
};

fn pair(generation: usize) -> PolicySet {
    // Each generation holds an allow and a deny for the same request, so a
    // consistent snapshot always denies. A torn read would allow.
    PolicySet {
        policies: vec![
            Policy::allow(format!("allow-{generation}"))
                .for_subject(SubjectMatcher::any())
                .on_resource(ResourceMatcher::any())
                .for_action("read"),
            Policy::deny(format!("deny-{generation}"))
                .for_subject(SubjectMatcher::id("alice"))
                .on_resource(ResourceMatcher::any())
                .for_action("read"),
        ],
    }
}

#[test]
fn readers_never_see_half_updated_sets() {
    let authorizer = Arc::new(PolicyAuthorizer::from_set(pair(0)).unwrap());
    let stop = Arc::new(AtomicBool::new(false));
    let request = AccessRequest::new(Subject::new("alice"), "read", Resource::new("doc", "d1"));

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let authorizer = Arc::clone(&authorizer);
            let stop = Arc::clone(&stop);
            let request = request.clone();
            thread::spawn(move || {
                let mut checked = 0u64;
                loop {
                    let decision = authorizer.authorize(&request);
                    assert!(!decision.allowed, "torn snapshot: {decision:?}");
                    checked += 1;
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                }
                checked
            })
        })
        .collect();

    for generation in 1..200 {
        authorizer.replace_all(pair(generation)).unwrap();
    }
    stop.store(true, Ordering::Relaxed);

    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
    assert_eq!(authorizer.len(), 2);
}

#[test]
fn yaml_policy_file_drives_decisions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policies.yaml");
    std::fs::write(
        &path,
        r#"
- id: editors-write
  effect: allow
  subjects:
    - roles: [editor]
  resources:
    - id: "docs/*"
  actions: [update]
- id: owner-delete
  effect: allow
  subjects:
    - id: "*"
  resources:
    - type: document
  actions: [delete]
  conditions:
    - name: owner
      type: subject_is_owner
"#,
    )
    .unwrap();

    let authorizer = PolicyAuthorizer::from_set(PolicySet::from_file(&path).unwrap()).unwrap();

    let editor = Subject::new("erin").with_role("editor");
    let doc = Resource::new("document", "docs/roadmap").with_attribute("owner", "olga");

    assert!(
        authorizer
            .authorize(&AccessRequest::new(editor.clone(), "update", doc.clone()))
            .allowed
    );
    assert!(
        !authorizer
            .authorize(&AccessRequest::new(editor, "delete", doc.clone()))
            .allowed
    );
    assert!(
        authorizer
            .authorize(&AccessRequest::new(Subject::new("olga"), "delete", doc))
            .allowed
    );
}

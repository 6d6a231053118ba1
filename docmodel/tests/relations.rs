mod common;

use docmodel::{
    bson::{Bson, Document, doc, oid::ObjectId},
    prelude::*,
};

use common::{counting_registry, memory_registry};

struct Blog {
    user: ModelRef,
    post: ModelRef,
}

fn define_blog(registry: &ModelRegistry) -> Blog {
    let user = registry
        .define("user", |schema| {
            schema
                .property("name", TypeKind::String)?
                .has_many("post", RelationOptions::new())?
                .has_one("profile", RelationOptions::new())?;
            Ok(())
        })
        .expect("defines user");

    let post = registry
        .define("post", |schema| {
            schema
                .property("title", TypeKind::String)?
                .belongs_to("user", RelationOptions::new().required())?;
            Ok(())
        })
        .expect("defines post");

    Blog { user, post }
}

fn titles(value: Option<Bson>) -> Vec<String> {
    match value {
        Some(Bson::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_document())
            .filter_map(|doc| doc.get_str("title").ok())
            .map(str::to_string)
            .collect(),
        other => panic!("expected an array, got {other:?}"),
    }
}

#[tokio::test]
async fn belongs_to_missing_target_resolves_to_null() {
    let registry = memory_registry().await;
    let blog = define_blog(&registry);

    let ada = blog.user.insert_one(doc! { "name": "ada" }).await.expect("inserts");
    blog.post
        .insert(vec![
            doc! { "title": "kept", "user": ada.get("_id").cloned() },
            doc! { "title": "orphan", "user": ObjectId::new() },
        ])
        .await
        .expect("inserts");

    let posts = blog
        .post
        .find(doc! {})
        .sort("title")
        .populate("user")
        .exec()
        .await
        .expect("executes")
        .into_instances();

    let user = posts[0].get("user").expect("populated");
    assert_eq!(
        user.as_document().and_then(|doc| doc.get_str("name").ok()),
        Some("ada")
    );
    assert_eq!(posts[1].get("user"), Some(Bson::Null));

    let orphan = blog
        .post
        .find_one(doc! { "title": "orphan" })
        .populate("user")
        .exec()
        .await
        .expect("executes")
        .into_instance()
        .expect("found");
    assert_eq!(orphan.get("user"), Some(Bson::Null));
}

#[tokio::test]
async fn has_many_without_matches_resolves_to_an_empty_sequence() {
    let registry = memory_registry().await;
    let blog = define_blog(&registry);

    let ada = blog.user.insert_one(doc! { "name": "ada" }).await.expect("inserts");
    let alan = blog.user.insert_one(doc! { "name": "alan" }).await.expect("inserts");
    blog.post
        .insert(vec![
            doc! { "title": "b", "user": ada.get("_id").cloned() },
            doc! { "title": "a", "user": ada.get("_id").cloned() },
        ])
        .await
        .expect("inserts");

    let users = blog
        .user
        .find(doc! {})
        .sort("name")
        .populate_with("posts", doc! { "sort": "title" })
        .exec()
        .await
        .expect("executes")
        .into_instances();

    assert_eq!(titles(users[0].get("posts")), vec!["a", "b"]);
    assert_eq!(users[1].id(), alan.get("_id"));
    assert_eq!(users[1].get("posts"), Some(Bson::Array(vec![])));
}

#[tokio::test]
async fn has_one_resolves_a_single_match_or_null() {
    let registry = memory_registry().await;
    let blog = define_blog(&registry);
    let profile = registry
        .define("profile", |schema| {
            schema
                .property("bio", TypeKind::String)?
                .property("user", TypeKind::ObjectId)?;
            Ok(())
        })
        .expect("defines profile");

    let ada = blog.user.insert_one(doc! { "name": "ada" }).await.expect("inserts");
    blog.user.insert_one(doc! { "name": "alan" }).await.expect("inserts");
    profile
        .insert_one(doc! { "bio": "analyst", "user": ada.get("_id").cloned() })
        .await
        .expect("inserts");

    let users = blog
        .user
        .find(doc! {})
        .sort("name")
        .populate("profile")
        .exec()
        .await
        .expect("executes")
        .into_instances();

    let bio = users[0]
        .get("profile")
        .and_then(|profile| profile.as_document().and_then(|doc| doc.get_str("bio").ok().map(str::to_string)));
    assert_eq!(bio.as_deref(), Some("analyst"));
    assert_eq!(users[1].get("profile"), Some(Bson::Null));
}

#[tokio::test]
async fn populations_run_together_in_one_exec() {
    let (registry, store) = counting_registry();
    let blog = define_blog(&registry);
    registry
        .define("profile", |schema| {
            schema.property("user", TypeKind::ObjectId)?;
            Ok(())
        })
        .expect("defines profile");

    let users = (0..3)
        .map(|n| doc! { "name": format!("user-{n}") })
        .collect::<Vec<Document>>();
    let users = blog.user.insert(users).await.expect("inserts");
    let posts = users
        .iter()
        .map(|user| doc! { "title": "hello", "user": user.get("_id").cloned() })
        .collect::<Vec<Document>>();
    blog.post.insert(posts).await.expect("inserts");

    let before = store.calls();
    let populated = blog
        .user
        .find(doc! {})
        .populate("posts")
        .populate("profile")
        .exec()
        .await
        .expect("executes")
        .into_instances();

    // One find for the users, then one batched lookup per relation.
    assert_eq!(store.calls() - before, 3);
    assert_eq!(populated.len(), 3);
    assert!(populated.iter().all(|user| titles(user.get("posts")) == vec!["hello"]));
}

#[tokio::test]
async fn failed_population_rejects_the_whole_exec() {
    let registry = memory_registry().await;
    let comment = registry
        .define("comment", |schema| {
            schema
                .property("body", TypeKind::String)?
                .belongs_to("article", RelationOptions::new())?;
            Ok(())
        })
        .expect("defines");

    comment
        .insert_one(doc! { "body": "first", "article": ObjectId::new() })
        .await
        .expect("inserts");

    let mut query = comment.find(doc! {}).populate("article");
    let result = query.exec().await;

    assert!(matches!(result, Err(DocumentStoreError::ModelNotFound(name)) if name == "article"));
    assert_eq!(query.state(), QueryState::Rejected);
}

#[tokio::test]
async fn relation_accessors_are_callable() {
    let registry = memory_registry().await;
    let blog = define_blog(&registry);

    let ada = blog.user.insert_one(doc! { "name": "ada" }).await.expect("inserts");
    let post = blog
        .post
        .insert_one(doc! { "title": "notes", "user": ada.get("_id").cloned() })
        .await
        .expect("inserts");

    let populated = blog
        .post
        .call("populate_user", vec![Bson::Array(vec![Bson::Document(post.clone())])])
        .await
        .expect("populates");
    let Bson::Array(items) = populated else {
        panic!("expected an array");
    };
    assert_eq!(
        items[0]
            .as_document()
            .and_then(|doc| doc.get_document("user").ok())
            .and_then(|user| user.get_str("name").ok()),
        Some("ada")
    );

    let mut instance = blog.post.wrap(post);
    instance.call("populate_user", vec![]).await.expect("populates");
    assert!(matches!(instance.get("user"), Some(Bson::Document(_))));

    let mut author = blog.user.wrap(ada);
    author.populate("posts", &doc! {}).await.expect("populates");
    assert_eq!(titles(author.get("posts")), vec!["notes"]);
}

#[tokio::test]
async fn belongs_to_declares_a_required_reference() {
    let registry = memory_registry().await;
    let blog = define_blog(&registry);

    let mut post = blog.post.build(doc! { "title": "draft" });
    let errors = post.validate().await;

    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].path, "user");

    let relation = blog.user.relation("posts").expect("declared");
    assert_eq!(relation.kind(), RelationKind::HasMany);
    assert_eq!(relation.inverse(), "user");
    assert_eq!(relation.target(), "post");
}

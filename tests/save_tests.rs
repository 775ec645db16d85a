//! End-to-end save tests against in-memory SQLite.

use graphsaver::demo;
use graphsaver::{
    Collection, CollectionDef, Entity, EntityArena, Error, FieldDef, Lite, RecordingDriver, SaveContext, SaveSettings,
    Schema, SqlType, SqliteStorage, TableDef, TypeName, Value, save,
};
use rusqlite::params;

fn catalog() -> Schema {
    Schema::new()
        .with(TableDef::new("Author", "authors").field("name", FieldDef::value("name", SqlType::Text)))
        .with(
            TableDef::new("Book", "books")
                .versioned()
                .field("title", FieldDef::value("title", SqlType::Text))
                .field("author", FieldDef::reference("author_id", "Author")),
        )
        .with(
            TableDef::new("Person", "people")
                .field("name", FieldDef::value("name", SqlType::Text))
                .field("partner", FieldDef::reference("partner_id", "Person").nullable()),
        )
        .with(TableDef::new("Tag", "tags").field("name", FieldDef::value("name", SqlType::Text)))
        .with(
            TableDef::new("Playlist", "playlists")
                .field("name", FieldDef::value("name", SqlType::Text))
                .collection(CollectionDef::new(
                    "tracks",
                    "playlist_tracks",
                    "playlist_id",
                    FieldDef::value("title", SqlType::Text),
                )),
        )
        .with(
            TableDef::new("Setlist", "setlists")
                .field("venue", FieldDef::value("venue", SqlType::Text))
                .collection(
                    CollectionDef::new("songs", "setlist_songs", "setlist_id", FieldDef::value("title", SqlType::Text))
                        .ordered("position"),
                ),
        )
        .with(
            TableDef::new("Label", "labels")
                .versioned()
                .field("name", FieldDef::value("name", SqlType::Text))
                .collection(CollectionDef::new(
                    "roster",
                    "label_roster",
                    "label_id",
                    FieldDef::reference("artist_id", "Artist"),
                )),
        )
        .with(
            TableDef::new("Artist", "artists")
                .field("name", FieldDef::value("name", SqlType::Text))
                .field("label", FieldDef::reference("label_id", "Label")),
        )
}

fn storage(schema: &Schema) -> SqliteStorage {
    let storage = SqliteStorage::open_memory().unwrap();
    storage.create_tables(schema).unwrap();
    storage
}

fn statements_starting_with(recorder: &RecordingDriver<'_>, prefix: &str) -> usize {
    recorder
        .commands()
        .iter()
        .filter(|c| c.sql.starts_with(prefix))
        .count()
}

#[test]
fn test_referenced_row_is_inserted_first() {
    let schema = catalog();
    let storage = storage(&schema);
    let recorder = RecordingDriver::new(storage.conn());

    let mut arena = EntityArena::new();
    let author = arena.add(Entity::new("Author").with("name", "Ursula K. Le Guin"));
    let book = arena.add(
        Entity::new("Book")
            .with("title", "The Dispossessed")
            .with("author", author),
    );

    save(&SaveContext::new(&schema), &recorder, &mut arena, &[book]).unwrap();

    let commands = recorder.commands();
    assert_eq!(commands.len(), 2);
    assert!(commands[0].sql.starts_with("INSERT INTO \"authors\""));
    assert!(commands[1].sql.starts_with("INSERT INTO \"books\""));

    let author_id: i64 = storage
        .conn()
        .query_row("SELECT author_id FROM books WHERE id = ?1", params![arena[book].id()], |r| r.get(0))
        .unwrap();
    assert_eq!(Some(author_id), arena[author].id());
    assert_eq!(arena[book].version(), Some(1));
}

#[test]
fn test_stale_version_conflicts_without_further_statements() {
    let schema = catalog();
    let storage = storage(&schema);
    storage
        .conn()
        .execute_batch(
            "INSERT INTO authors (id, name) VALUES (1, 'Le Guin');
             INSERT INTO books (id, title, author_id, version) VALUES (1, 'Earthsea', 1, 5);",
        )
        .unwrap();
    let recorder = RecordingDriver::new(storage.conn());

    let mut arena = EntityArena::new();
    let book = arena.add(
        Entity::existing("Book", 1, Some(4))
            .with("title", "Earthsea")
            .with("author", Lite::new("Author", 1)),
    );
    arena[book].set("title", "A Wizard of Earthsea");

    let err = save(&SaveContext::new(&schema), &recorder, &mut arena, &[book]).unwrap_err();
    match err {
        Error::ConcurrencyConflict { type_name, ids } => {
            assert_eq!(type_name, TypeName::from("Book"));
            assert_eq!(ids, vec![1]);
        }
        other => panic!("expected a concurrency conflict, got {other:?}"),
    }
    assert_eq!(recorder.commands().len(), 1);
    assert_eq!(arena[book].version(), Some(4));

    let title: String = storage
        .conn()
        .query_row("SELECT title FROM books WHERE id = 1", [], |r| r.get(0))
        .unwrap();
    assert_eq!(title, "Earthsea");
}

#[test]
fn test_mutual_cycle_is_repaired_with_one_update() {
    let schema = catalog();
    let storage = storage(&schema);
    let recorder = RecordingDriver::new(storage.conn());

    let mut arena = EntityArena::new();
    let ada = arena.add(Entity::new("Person").with("name", "Ada"));
    let charles = arena.add(Entity::new("Person").with("name", "Charles").with("partner", ada));
    arena[ada].set("partner", charles);

    save(&SaveContext::new(&schema), &recorder, &mut arena, &[ada]).unwrap();

    let commands = recorder.commands();
    assert_eq!(statements_starting_with(&recorder, "INSERT"), 2);
    assert_eq!(statements_starting_with(&recorder, "UPDATE"), 1);
    assert!(commands.last().unwrap().sql.starts_with("UPDATE \"people\""));

    let nulls = commands
        .iter()
        .filter(|c| c.sql.starts_with("INSERT"))
        .flat_map(|c| &c.parameters)
        .filter(|p| p.value == Value::Null)
        .count();
    assert_eq!(nulls, 1);

    let partner_of = |id: Option<i64>| -> Option<i64> {
        storage
            .conn()
            .query_row("SELECT partner_id FROM people WHERE id = ?1", params![id], |r| r.get(0))
            .unwrap()
    };
    assert_eq!(partner_of(arena[ada].id()), arena[charles].id());
    assert_eq!(partner_of(arena[charles].id()), arena[ada].id());
}

#[test]
fn test_batch_insert_assigns_ids_in_input_order() {
    let schema = catalog();
    let storage = storage(&schema);
    storage
        .conn()
        .execute_batch("INSERT INTO tags (name) VALUES ('old-1'), ('old-2');")
        .unwrap();
    let recorder = RecordingDriver::new(storage.conn());

    let mut arena = EntityArena::new();
    let names = ["bebop", "modal", "free", "fusion", "cool"];
    let tags: Vec<_> = names
        .iter()
        .map(|name| arena.add(Entity::new("Tag").with("name", *name)))
        .collect();

    save(&SaveContext::new(&schema), &recorder, &mut arena, &tags).unwrap();
    assert_eq!(recorder.commands().len(), 1);

    for (expected, (&handle, name)) in (3..).zip(tags.iter().zip(names)) {
        assert_eq!(arena[handle].id(), Some(expected));
        let stored: String = storage
            .conn()
            .query_row("SELECT name FROM tags WHERE id = ?1", params![expected], |r| r.get(0))
            .unwrap();
        assert_eq!(stored, name);
    }
}

#[test]
fn test_batch_bound_splits_statements_with_same_result() {
    fn run(settings: SaveSettings) -> (usize, Vec<(i64, String)>) {
        let schema = catalog();
        let storage = storage(&schema);
        let recorder = RecordingDriver::new(storage.conn());

        let mut arena = EntityArena::new();
        let tags: Vec<_> = (0..7)
            .map(|i| arena.add(Entity::new("Tag").with("name", format!("tag-{i}"))))
            .collect();
        let ctx = SaveContext::new(&schema).with_settings(settings);
        save(&ctx, &recorder, &mut arena, &tags).unwrap();

        let mut stmt = storage.conn().prepare("SELECT id, name FROM tags ORDER BY id").unwrap();
        let rows = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        (recorder.commands().len(), rows)
    }

    let (batched, batched_rows) = run(SaveSettings::default());
    let (split, split_rows) = run(SaveSettings::default().with_max_rows(3));
    let (single, single_rows) = run(SaveSettings::default().single_row());

    assert_eq!(batched, 1);
    assert_eq!(split, 3);
    assert_eq!(single, 7);
    assert_eq!(batched_rows, split_rows);
    assert_eq!(batched_rows, single_rows);
}

#[test]
fn test_untouched_collection_issues_no_statements() {
    let schema = catalog();
    let storage = storage(&schema);

    let mut arena = EntityArena::new();
    let playlist = arena.add(
        Entity::new("Playlist")
            .with("name", "Sunday")
            .with_collection("tracks", Collection::new().with("Naima").with("Blue in Green")),
    );
    save(&SaveContext::new(&schema), storage.conn(), &mut arena, &[playlist]).unwrap();
    assert_eq!(storage.count("playlist_tracks").unwrap(), 2);

    let recorder = RecordingDriver::new(storage.conn());
    arena[playlist].set("name", "Sunday morning");
    save(&SaveContext::new(&schema), &recorder, &mut arena, &[playlist]).unwrap();

    assert_eq!(recorder.count_touching("playlists"), 1);
    assert_eq!(recorder.count_touching("playlist_tracks"), 0);
}

#[test]
fn test_nulled_collection_deletes_rows() {
    let schema = catalog();
    let storage = storage(&schema);

    let mut arena = EntityArena::new();
    let playlist = arena.add(
        Entity::new("Playlist")
            .with("name", "Friday")
            .with_collection("tracks", Collection::new().with("So What").with("Freddie Freeloader")),
    );
    save(&SaveContext::new(&schema), storage.conn(), &mut arena, &[playlist]).unwrap();

    arena[playlist].set_collection("tracks", None);
    save(&SaveContext::new(&schema), storage.conn(), &mut arena, &[playlist]).unwrap();

    assert_eq!(storage.count("playlist_tracks").unwrap(), 0);
    assert!(!arena[playlist].is_collection_nulled("tracks"));
}

#[test]
fn test_invalid_graph_issues_no_sql() {
    let schema = catalog();
    let storage = storage(&schema);
    let recorder = RecordingDriver::new(storage.conn());

    let mut arena = EntityArena::new();
    let author = arena.add(Entity::new("Author").with("name", "Anonymous"));
    let book = arena.add(Entity::new("Book").with("title", "Untitled"));

    let err = save(&SaveContext::new(&schema), &recorder, &mut arena, &[author, book]).unwrap_err();
    assert!(matches!(err, Error::Validation(ref text) if text.contains("cannot be null")));
    assert!(recorder.commands().is_empty());
    assert!(arena[author].is_new());
    assert_eq!(arena[author].id(), None);
}

#[test]
fn test_failed_save_rolls_back_and_restores_arena() {
    let schema = catalog();
    let mut storage = storage(&schema);
    storage
        .conn()
        .execute_batch(
            "INSERT INTO authors (id, name) VALUES (1, 'Le Guin');
             INSERT INTO books (id, title, author_id, version) VALUES (1, 'Earthsea', 1, 2);",
        )
        .unwrap();

    let mut arena = EntityArena::new();
    let author = arena.add(Entity::new("Author").with("name", "Tehanu"));
    let book = arena.add(
        Entity::existing("Book", 1, Some(1))
            .with("title", "Earthsea")
            .with("author", Lite::new("Author", 1)),
    );
    arena[book].set("author", author);

    let err = storage
        .save(&SaveContext::new(&schema), &mut arena, &[book])
        .unwrap_err();
    assert!(matches!(err, Error::ConcurrencyConflict { .. }));

    assert!(arena[author].is_new());
    assert_eq!(arena[author].id(), None);
    assert_eq!(arena[book].version(), Some(1));
    assert_eq!(storage.count("authors").unwrap(), 1);
}

#[test]
fn test_demo_graph_saves() {
    let schema = demo::schema();
    let mut storage = storage(&schema);

    let mut arena = EntityArena::new();
    let graph = demo::build_graph(&mut arena);
    storage
        .save(&SaveContext::new(&schema), &mut arena, &graph.roots())
        .unwrap();

    for (table, rows) in [
        ("genres", 1),
        ("labels", 1),
        ("artists", 1),
        ("albums", 1),
        ("album_songs", 4),
        ("reviews", 1),
    ] {
        assert_eq!(storage.count(table).unwrap(), rows, "{table}");
    }

    let conn = storage.conn();
    let album_id = arena[graph.album].id();
    let best_album: Option<i64> = conn
        .query_row("SELECT best_album_id FROM artists", [], |r| r.get(0))
        .unwrap();
    assert_eq!(best_album, album_id);
    assert_eq!(arena[graph.artist].version(), Some(2));
    assert_eq!(arena[graph.album].version(), Some(1));

    let (sponsor_artist, sponsor_label): (Option<i64>, Option<i64>) = conn
        .query_row("SELECT sponsor_artist_id, sponsor_label_id FROM albums", [], |r| {
            Ok((r.get(0)?, r.get(1)?))
        })
        .unwrap();
    assert_eq!(sponsor_artist, None);
    assert_eq!(sponsor_label, arena[graph.label].id());

    let (subject_id, subject_type): (i64, i64) = conn
        .query_row("SELECT subject_id, subject_type FROM reviews", [], |r| Ok((r.get(0)?, r.get(1)?)))
        .unwrap();
    assert_eq!(Some(subject_id), album_id);
    assert_eq!(Some(subject_type), schema.type_id(&TypeName::from("Album")));

    let first_song: String = conn
        .query_row("SELECT name FROM album_songs ORDER BY position LIMIT 1", [], |r| r.get(0))
        .unwrap();
    assert_eq!(first_song, "Part 1: Acknowledgement");
    assert_eq!(arena[graph.genre].id(), Some(1));
}

#[test]
fn test_large_collection_removal_stays_within_row_bound() {
    let schema = catalog();
    let storage = storage(&schema);

    // more rows than SQLite accepts parameters in one statement
    let total = 33_000;
    let mut tracks = Collection::new();
    for i in 0..total {
        tracks.push(format!("track {i}"));
    }
    let mut arena = EntityArena::new();
    let playlist = arena.add(Entity::new("Playlist").with("name", "Everything").with_collection("tracks", tracks));
    save(&SaveContext::new(&schema), storage.conn(), &mut arena, &[playlist]).unwrap();
    assert_eq!(storage.count("playlist_tracks").unwrap(), i64::from(total));

    let recorder = RecordingDriver::new(storage.conn());
    let collection = arena[playlist].collection_mut("tracks").unwrap();
    let last = collection.len() - 1;
    collection.remove(last);
    save(&SaveContext::new(&schema), &recorder, &mut arena, &[playlist]).unwrap();

    assert_eq!(storage.count("playlist_tracks").unwrap(), i64::from(total) - 1);
    assert_eq!(statements_starting_with(&recorder, "DELETE"), 1);
    assert_eq!(statements_starting_with(&recorder, "INSERT"), 0);
    assert!(recorder.commands().iter().all(|c| c.parameters.len() <= 3));
}

#[test]
fn test_reordered_collection_keeps_row_ids() {
    let schema = catalog();
    let storage = storage(&schema);

    let mut arena = EntityArena::new();
    let songs = Collection::new().with("a").with("b").with("c").with("d");
    let setlist = arena.add(Entity::new("Setlist").with("venue", "Village Vanguard").with_collection("songs", songs));
    save(&SaveContext::new(&schema), storage.conn(), &mut arena, &[setlist]).unwrap();
    let original = arena[setlist].collection("songs").unwrap().row_ids();
    assert_eq!(original.len(), 4);

    let songs = arena[setlist].collection_mut("songs").unwrap();
    songs.remove(0);
    songs.move_row(2, 0);
    songs.push("e");
    save(&SaveContext::new(&schema), storage.conn(), &mut arena, &[setlist]).unwrap();

    let mut stmt = storage
        .conn()
        .prepare("SELECT id, title FROM setlist_songs ORDER BY position")
        .unwrap();
    let stored: Vec<(i64, String)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    let titles: Vec<&str> = stored.iter().map(|(_, t)| t.as_str()).collect();
    assert_eq!(titles, vec!["d", "b", "c", "e"]);

    let row_ids = arena[setlist].collection("songs").unwrap().row_ids();
    let stored_ids: Vec<i64> = stored.iter().map(|&(id, _)| id).collect();
    assert_eq!(row_ids, stored_ids);
    // d, b and c kept their rows; e got a new one
    assert_eq!(&row_ids[..3], &[original[3], original[1], original[2]]);
    assert!(!original.contains(&row_ids[3]));
}

#[test]
fn test_multi_row_update_reports_only_stale_ids() {
    let schema = catalog();
    let mut storage = storage(&schema);
    storage
        .conn()
        .execute_batch(
            "INSERT INTO authors (id, name) VALUES (1, 'Le Guin');
             INSERT INTO books (id, title, author_id, version) VALUES
                 (1, 'one', 1, 1), (2, 'two', 1, 5), (3, 'three', 1, 1);",
        )
        .unwrap();

    let load = |arena: &mut EntityArena, versions: [i64; 3]| -> Vec<_> {
        (1..=3)
            .zip(versions)
            .map(|(id, version)| {
                let handle = arena.add(
                    Entity::existing("Book", id, Some(version))
                        .with("title", "old")
                        .with("author", Lite::new("Author", 1)),
                );
                arena[handle].set("title", format!("new {id}"));
                handle
            })
            .collect()
    };
    let renamed = |storage: &SqliteStorage| -> i64 {
        storage
            .conn()
            .query_row("SELECT COUNT(*) FROM books WHERE title LIKE 'new%'", [], |r| r.get(0))
            .unwrap()
    };

    {
        let tx = storage.conn_mut().transaction().unwrap();
        let recorder = RecordingDriver::new(&tx);
        let mut arena = EntityArena::new();
        let books = load(&mut arena, [1, 1, 1]);
        let err = save(&SaveContext::new(&schema), &recorder, &mut arena, &books).unwrap_err();
        match err {
            Error::ConcurrencyConflict { ids, .. } => assert_eq!(ids, vec![2]),
            other => panic!("expected a concurrency conflict, got {other:?}"),
        }
        let commands = recorder.commands();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].sql.contains("FROM (VALUES"));
        assert!(books.iter().all(|&b| arena[b].version() == Some(1)));
        // dropping the transaction rolls back the rows that did match
    }

    let mut arena = EntityArena::new();
    let books = load(&mut arena, [1, 1, 1]);
    storage
        .save(&SaveContext::new(&schema), &mut arena, &books)
        .unwrap_err();
    assert_eq!(renamed(&storage), 0);

    // the same batch goes through once every version is current
    let mut arena = EntityArena::new();
    let books = load(&mut arena, [1, 5, 1]);
    storage.save(&SaveContext::new(&schema), &mut arena, &books).unwrap();
    let versions: Vec<Option<i64>> = books.iter().map(|&b| arena[b].version()).collect();
    assert_eq!(versions, vec![Some(2), Some(6), Some(2)]);
    assert_eq!(renamed(&storage), 3);
}

#[test]
fn test_collection_cycle_needs_no_repair_update() {
    let schema = catalog();
    let storage = storage(&schema);
    let recorder = RecordingDriver::new(storage.conn());

    let mut arena = EntityArena::new();
    let label = arena.add(Entity::new("Label").with("name", "Blue Note"));
    let artist = arena.add(Entity::new("Artist").with("name", "Lee Morgan").with("label", label));
    arena[label].set_collection("roster", Some(Collection::new().with(artist)));

    save(&SaveContext::new(&schema), &recorder, &mut arena, &[label]).unwrap();

    let sql: Vec<String> = recorder.commands().iter().map(|c| c.sql.to_string()).collect();
    assert_eq!(sql.len(), 3);
    assert!(sql[0].starts_with("INSERT INTO \"labels\""));
    assert!(sql[1].starts_with("INSERT INTO \"artists\""));
    assert!(sql[2].starts_with("INSERT INTO \"label_roster\""));
    assert_eq!(statements_starting_with(&recorder, "UPDATE"), 0);
    assert_eq!(arena[label].version(), Some(1));

    let member: i64 = storage
        .conn()
        .query_row("SELECT artist_id FROM label_roster", [], |r| r.get(0))
        .unwrap();
    assert_eq!(Some(member), arena[artist].id());
}

//! A small music catalog used by `gsave explain`, `gsave demo` and tests.
//!
//! The graph it builds exercises every write path at once:
//! - `Artist.best_album` and `Album.artist` form a cycle broken through the
//!   nullable `best_album_id` column
//! - `Album.songs` is an ordered collection of embedded values
//! - `Album.sponsor` is a polymorphic reference over artists and labels
//! - `Review.subject` can point at any registered type
//! - `Genre` ids are assigned by the caller

use crate::model::{Collection, Embedded, Entity, EntityArena, Handle};
use crate::schema::{Column, CollectionDef, FieldDef, MixinDef, Schema, SqlType, TableDef};

/// Register the demo tables.
#[must_use]
pub fn schema() -> Schema {
    Schema::new()
        .with(
            TableDef::new("Genre", "genres")
                .caller_assigned_ids()
                .field("name", FieldDef::value("name", SqlType::Text).size(40)),
        )
        .with(
            TableDef::new("Label", "labels")
                .versioned()
                .field("name", FieldDef::value("name", SqlType::Text))
                .field("parent", FieldDef::reference("parent_id", "Label").nullable())
                .field(
                    "country",
                    FieldDef::embedded(vec![
                        ("code", FieldDef::value("country_code", SqlType::Text).size(2)),
                        ("name", FieldDef::value("country_name", SqlType::Text)),
                    ])
                    .nullable(),
                ),
        )
        .with(
            TableDef::new("Artist", "artists")
                .versioned()
                .to_str(60)
                .field("name", FieldDef::value("name", SqlType::Text))
                .field("active", FieldDef::value("active", SqlType::Boolean))
                .field("best_album", FieldDef::reference("best_album_id", "Album").nullable()),
        )
        .with(
            TableDef::new("Album", "albums")
                .versioned()
                .field("title", FieldDef::value("title", SqlType::Text))
                .field("year", FieldDef::value("year", SqlType::Integer).nullable())
                .field("artist", FieldDef::reference("artist_id", "Artist"))
                .field("genre", FieldDef::reference("genre_id", "Genre").nullable())
                .field(
                    "sponsor",
                    FieldDef::ImplementedBy(vec![
                        Column::reference("sponsor_artist_id", "Artist"),
                        Column::reference("sponsor_label_id", "Label"),
                    ])
                    .nullable(),
                )
                .mixin(MixinDef::new("audit").field("created_by", FieldDef::value("created_by", SqlType::Text).nullable()))
                .collection(
                    CollectionDef::new(
                        "songs",
                        "album_songs",
                        "album_id",
                        FieldDef::embedded(vec![
                            ("name", FieldDef::value("name", SqlType::Text)),
                            ("seconds", FieldDef::value("seconds", SqlType::Integer)),
                        ]),
                    )
                    .ordered("position"),
                ),
        )
        .with(
            TableDef::new("Review", "reviews")
                .field("stars", FieldDef::value("stars", SqlType::Integer))
                .field(
                    "subject",
                    FieldDef::ImplementedByAll {
                        id: Column::new("subject_id", SqlType::Integer),
                        type_column: Column::new("subject_type", SqlType::Integer),
                    },
                ),
        )
}

fn song(name: &str, seconds: i64) -> Embedded {
    Embedded::new().with("name", name).with("seconds", seconds)
}

/// Handles of the demo graph.
#[derive(Debug, Clone, Copy)]
pub struct DemoGraph {
    pub genre: Handle,
    pub label: Handle,
    pub artist: Handle,
    pub album: Handle,
    pub review: Handle,
}

impl DemoGraph {
    /// Roots to pass to `save`; everything else is reachable from them.
    #[must_use]
    pub fn roots(&self) -> Vec<Handle> {
        vec![self.artist, self.review]
    }
}

/// Add a fresh, unsaved demo graph to `arena`.
pub fn build_graph(arena: &mut EntityArena) -> DemoGraph {
    let genre = arena.add(Entity::new("Genre").with_id(1).with("name", "Jazz"));
    let label = arena.add(
        Entity::new("Label")
            .with("name", "Impulse!")
            .with("country", Embedded::new().with("code", "US").with("name", "United States")),
    );

    let mut artist_entity = Entity::new("Artist").with("name", "John Coltrane").with("active", false);
    artist_entity.set_to_str("John Coltrane");
    let artist = arena.add(artist_entity);

    let songs = Collection::new()
        .with(song("Part 1: Acknowledgement", 467))
        .with(song("Part 2: Resolution", 442))
        .with(song("Part 3: Pursuance", 641))
        .with(song("Part 4: Psalm", 422));
    let album = arena.add(
        Entity::new("Album")
            .with("title", "A Love Supreme")
            .with("year", 1965)
            .with("artist", artist)
            .with("genre", genre)
            .with("sponsor", label)
            .with_mixin("audit", Embedded::new().with("created_by", "gsave"))
            .with_collection("songs", songs),
    );
    arena[artist].set("best_album", album);

    let review = arena.add(Entity::new("Review").with("stars", 5).with("subject", album));

    DemoGraph {
        genre,
        label,
        artist,
        album,
        review,
    }
}

//! Shared constants for end-to-end tests
//!
//! When the fixture library changes, update only this file.

// ============================================================================
// Server
// ============================================================================

/// How long to wait for a spawned server to answer `/info`
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Delay between readiness polls
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 20;

/// Per-request timeout of the test client
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Password used by servers spawned with authentication
pub const TEST_PASSWORD: &str = "testpass123";

// ============================================================================
// Fixture library
// ============================================================================

/// "Opening Track" by The Test Band, on First Album
pub const SONG_1_FILE: &str = "test-band/first-album/01-opening.mp3";

/// "Second Song" by The Test Band, on First Album
pub const SONG_2_FILE: &str = "test-band/first-album/02-second.mp3";

/// "Smooth" by Jazz Ensemble, on Jazz Collection
pub const SONG_3_FILE: &str = "jazz-ensemble/collection/01-smooth.ogg";

/// M3U playlist with songs 2 and 3
pub const PLAYLIST_FILE: &str = "favourites.m3u";

/// Number of songs in the fixture library
pub const SONG_COUNT: usize = 3;

/// Size of every fixture song file
pub const TEST_AUDIO_SIZE_BYTES: usize = 4096;

/// Side of the square artwork stored for the first album
pub const ALBUM_ART_SIZE: u32 = 64;

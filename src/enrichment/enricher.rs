use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::artwork::thumbnail_set;
use super::queue::TaskRunner;
use super::{EnrichmentError, EnrichmentTarget, EnrichmentTask, MetadataSource};

/// Looks tasks up in a metadata source and writes results to a target.
pub struct Enricher {
    source: Arc<dyn MetadataSource>,
    target: Arc<dyn EnrichmentTarget>,
    thumbnail: (u32, u32),
}

impl Enricher {
    pub fn new(
        source: Arc<dyn MetadataSource>,
        target: Arc<dyn EnrichmentTarget>,
        thumbnail: (u32, u32),
    ) -> Self {
        Self {
            source,
            target,
            thumbnail,
        }
    }

    fn enrich(
        &self,
        task: &EnrichmentTask,
        cancel: &CancellationToken,
    ) -> Result<(), EnrichmentError> {
        let Some(info) = self.source.lookup(task, cancel)? else {
            debug!("No metadata found for {}", task);
            return Ok(());
        };
        if cancel.is_cancelled() {
            return Err(EnrichmentError::Cancelled);
        }

        if let Some(mbid) = &info.mbid {
            if let Err(e) = self.target.set_mbid(task.kind(), task.id(), mbid) {
                warn!("Failed to store mbid of {}: {:#}", task, e);
            }
        }

        if let Some(url) = &info.image_url {
            let data = self.source.fetch_image(url, cancel)?;
            if cancel.is_cancelled() {
                return Err(EnrichmentError::Cancelled);
            }
            let images = thumbnail_set(&data, self.thumbnail)?;
            if let Err(e) = self.target.store_images(task.kind(), task.id(), &images) {
                warn!("Failed to store artwork of {}: {:#}", task, e);
            }
        }
        Ok(())
    }
}

impl TaskRunner for Enricher {
    fn run(&self, task: EnrichmentTask, cancel: &CancellationToken) {
        if cancel.is_cancelled() {
            return;
        }
        match self.enrich(&task, cancel) {
            Ok(()) => debug!("Enriched {}", task),
            Err(EnrichmentError::Cancelled) => debug!("Enrichment of {} cancelled", task),
            Err(e) => warn!("Failed to enrich {}: {}", task, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog_store::{EntityKind, ImageData};
    use crate::enrichment::RemoteInfo;
    use image::{DynamicImage, ImageFormat, RgbImage};
    use std::io::Cursor;
    use std::sync::Mutex;

    struct FakeSource {
        info: Option<RemoteInfo>,
        image: Vec<u8>,
        cancel_on_lookup: Option<CancellationToken>,
    }

    impl MetadataSource for FakeSource {
        fn lookup(
            &self,
            _task: &EnrichmentTask,
            _cancel: &CancellationToken,
        ) -> Result<Option<RemoteInfo>, EnrichmentError> {
            if let Some(token) = &self.cancel_on_lookup {
                token.cancel();
            }
            Ok(self.info.clone())
        }

        fn fetch_image(
            &self,
            _url: &str,
            _cancel: &CancellationToken,
        ) -> Result<Vec<u8>, EnrichmentError> {
            Ok(self.image.clone())
        }
    }

    #[derive(Default)]
    struct RecordingTarget {
        mbids: Mutex<Vec<(EntityKind, i64, String)>>,
        images: Mutex<Vec<(EntityKind, i64, Vec<(u32, u32)>)>>,
    }

    impl EnrichmentTarget for RecordingTarget {
        fn set_mbid(&self, kind: EntityKind, id: i64, mbid: &str) -> anyhow::Result<()> {
            self.mbids.lock().unwrap().push((kind, id, mbid.to_string()));
            Ok(())
        }

        fn store_images(
            &self,
            kind: EntityKind,
            id: i64,
            images: &[ImageData],
        ) -> anyhow::Result<()> {
            let sizes = images.iter().map(|i| (i.width, i.height)).collect();
            self.images.lock().unwrap().push((kind, id, sizes));
            Ok(())
        }
    }

    fn sample_png() -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(120, 80))
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn album_task() -> EnrichmentTask {
        EnrichmentTask::Album {
            id: 12,
            artist: "Cher".to_string(),
            album: "Believe".to_string(),
        }
    }

    #[test]
    fn writes_mbid_and_artwork_under_the_task_id() {
        let source = FakeSource {
            info: Some(RemoteInfo {
                mbid: Some("mb-12".to_string()),
                image_url: Some("https://img.example/12.png".to_string()),
            }),
            image: sample_png(),
            cancel_on_lookup: None,
        };
        let target = Arc::new(RecordingTarget::default());
        let enricher = Enricher::new(Arc::new(source), target.clone(), (64, 64));

        enricher.run(album_task(), &CancellationToken::new());

        assert_eq!(
            *target.mbids.lock().unwrap(),
            vec![(EntityKind::Album, 12, "mb-12".to_string())]
        );
        assert_eq!(
            *target.images.lock().unwrap(),
            vec![(EntityKind::Album, 12, vec![(120, 80), (64, 64)])]
        );
    }

    #[test]
    fn running_twice_overwrites_the_same_fields() {
        let source = FakeSource {
            info: Some(RemoteInfo {
                mbid: Some("mb-12".to_string()),
                image_url: None,
            }),
            image: vec![],
            cancel_on_lookup: None,
        };
        let target = Arc::new(RecordingTarget::default());
        let enricher = Enricher::new(Arc::new(source), target.clone(), (64, 64));

        enricher.run(album_task(), &CancellationToken::new());
        enricher.run(album_task(), &CancellationToken::new());

        let mbids = target.mbids.lock().unwrap();
        assert_eq!(mbids.len(), 2);
        assert_eq!(mbids[0], mbids[1]);
        assert!(target.images.lock().unwrap().is_empty());
    }

    #[test]
    fn cancellation_after_lookup_writes_nothing() {
        let cancel = CancellationToken::new();
        let source = FakeSource {
            info: Some(RemoteInfo {
                mbid: Some("mb".to_string()),
                image_url: Some("https://img.example/x.png".to_string()),
            }),
            image: sample_png(),
            cancel_on_lookup: Some(cancel.clone()),
        };
        let target = Arc::new(RecordingTarget::default());
        let enricher = Enricher::new(Arc::new(source), target.clone(), (64, 64));

        enricher.run(album_task(), &cancel);

        assert!(target.mbids.lock().unwrap().is_empty());
        assert!(target.images.lock().unwrap().is_empty());
    }
}

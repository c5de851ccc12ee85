use std::collections::HashMap;
use std::path::PathBuf;

use crate::project::{Media, Project};
use crate::scene::Element;
use crate::{Result, ShowSyncError};

/// A scene element bound to a concrete file.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMedia {
    pub element_id: String,
    pub media_id: Option<String>,
    pub path: PathBuf,
    pub duration_ms: Option<u64>,
}

/// Registry for all media referenced by scenes.
#[derive(Debug, Default)]
pub struct MediaLibrary {
    media: HashMap<String, Media>,
    base_path: Option<PathBuf>,
    check_files: bool,
}

impl MediaLibrary {
    pub fn new(project: &Project) -> Self {
        Self {
            media: project
                .media
                .iter()
                .map(|media| (media.id.clone(), media.clone()))
                .collect(),
            base_path: project.base_path.clone(),
            check_files: true,
        }
    }

    /// Skips the on-disk existence check, for outputs that do not read files.
    pub fn without_file_checks(mut self) -> Self {
        self.check_files = false;
        self
    }

    pub fn media(&self, id: &str) -> Option<&Media> {
        self.media.get(id)
    }

    /// `src` is either a media id or a project-relative path (it contains a
    /// `/` or starts with `media`).
    pub fn resolve(&self, element: &Element) -> Result<ResolvedMedia> {
        let props = element.media().ok_or_else(|| {
            ShowSyncError::config(format!(
                "{} element `{}` has no media reference",
                element.kind_name(),
                element.id
            ))
        })?;
        let src = props.src.as_str();

        let (media_id, path, duration_ms) = if src.contains('/') || src.starts_with("media") {
            let path = match &self.base_path {
                Some(base) => base.join(src),
                None => PathBuf::from(src),
            };
            (None, path, None)
        } else {
            let media = self.media.get(src).ok_or_else(|| {
                ShowSyncError::not_found(format!(
                    "media `{src}` referenced by element `{}`",
                    element.id
                ))
            })?;
            let path = match (&self.base_path, media.path.is_relative()) {
                (Some(base), true) => base.join(&media.path),
                _ => media.path.clone(),
            };
            let duration_ms = media
                .duration
                .filter(|secs| *secs > 0.0)
                .map(|secs| (secs * 1000.0).round() as u64);
            (Some(media.id.clone()), path, duration_ms)
        };

        if self.check_files && !path.exists() {
            return Err(ShowSyncError::not_found(format!(
                "media file `{}` for element `{}`",
                path.display(),
                element.id
            )));
        }

        Ok(ResolvedMedia {
            element_id: element.id.clone(),
            media_id,
            path,
            duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::MediaKind;
    use crate::scene::{ElementKind, MediaProps, TextProps};

    fn video(id: &str, src: &str) -> Element {
        Element {
            id: id.to_string(),
            name: String::new(),
            z_index: 0,
            visible: true,
            kind: ElementKind::Video(MediaProps {
                src: src.to_string(),
                autoplay: true,
                looping: false,
                volume: 1.0,
                muted: false,
            }),
        }
    }

    fn project_in(dir: &std::path::Path) -> Project {
        Project {
            base_path: Some(dir.to_path_buf()),
            media: vec![Media {
                id: "m-1".into(),
                name: "clip".into(),
                kind: MediaKind::Video,
                path: PathBuf::from("clip.mp4"),
                duration: Some(12.5),
                dimensions: None,
            }],
            ..Project::default()
        }
    }

    #[test]
    fn resolves_media_ids_against_base_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("clip.mp4"), b"").unwrap();
        let library = MediaLibrary::new(&project_in(dir.path()));

        let resolved = library.resolve(&video("v", "m-1")).unwrap();
        assert_eq!(resolved.path, dir.path().join("clip.mp4"));
        assert_eq!(resolved.media_id.as_deref(), Some("m-1"));
        assert_eq!(resolved.duration_ms, Some(12_500));
    }

    #[test]
    fn resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("media")).unwrap();
        std::fs::write(dir.path().join("media/loop.mp4"), b"").unwrap();
        let library = MediaLibrary::new(&project_in(dir.path()));

        let resolved = library.resolve(&video("v", "media/loop.mp4")).unwrap();
        assert_eq!(resolved.media_id, None);
        assert_eq!(resolved.path, dir.path().join("media/loop.mp4"));
    }

    #[test]
    fn errors_on_missing_file_and_unknown_id() {
        let dir = tempfile::tempdir().unwrap();
        let library = MediaLibrary::new(&project_in(dir.path()));

        let err = library.resolve(&video("v", "m-1")).unwrap_err();
        assert!(format!("{err}").contains("clip.mp4"));

        let err = library.resolve(&video("v", "nope")).unwrap_err();
        assert!(matches!(err, ShowSyncError::NotFound(_)));
    }

    #[test]
    fn text_elements_have_no_media() {
        let library = MediaLibrary::default().without_file_checks();
        let text = Element {
            id: "t".into(),
            name: String::new(),
            z_index: 0,
            visible: true,
            kind: ElementKind::Text(TextProps {
                content: "hi".into(),
            }),
        };
        assert!(library.resolve(&text).is_err());
    }
}

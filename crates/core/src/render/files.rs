use crate::render::{Locale, RenderError, Renderer, TemplateCache};
use lru::LruCache;
use minijinja::{Environment, UndefinedBehavior};
use serde_json::Value;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

type CacheKey = (String, String);

/// Templates read from a directory, optionally keeping compiled templates in an LRU cache.
///
/// Each loaded view is compiled into its own [`Environment`] under the view name, so
/// minijinja's auto-escaping applies to `.html`/`.htm` views and nothing else.
#[derive(Debug)]
pub struct FileTemplates {
    dir: PathBuf,
    entries: Option<Mutex<LruCache<CacheKey, Arc<Environment<'static>>>>>,
}

impl FileTemplates {
    pub fn new(dir: impl Into<PathBuf>, cache: TemplateCache) -> Self {
        let entries = match cache {
            TemplateCache::None => None,
            TemplateCache::Bounded(capacity) => {
                NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap)))
            }
        };
        Self {
            dir: dir.into(),
            entries,
        }
    }

    pub fn cached_len(&self) -> usize {
        self.entries.as_ref().map_or(0, |entries| {
            entries.lock().unwrap_or_else(PoisonError::into_inner).len()
        })
    }

    pub fn clear_cache(&self) {
        if let Some(entries) = &self.entries {
            entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
        }
    }

    fn load(&self, view: &str, locale: &Locale) -> Result<Arc<Environment<'static>>, RenderError> {
        validate_view_name(view)?;

        let key = (view.to_string(), locale.to_string());
        if let Some(entries) = &self.entries {
            let mut entries = entries.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(hit) = entries.get(&key) {
                return Ok(hit.clone());
            }
        }

        let (stem, ext) = match view.rfind('.') {
            Some(dot) if !view[dot..].contains('/') => view.split_at(dot),
            _ => (view, ""),
        };

        for suffix in locale.suffixes() {
            let path = self.dir.join(format!("{stem}{suffix}{ext}"));
            let src = match std::fs::read_to_string(&path) {
                Ok(src) => src,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(source) => {
                    return Err(RenderError::Io {
                        view: view.to_string(),
                        source,
                    })
                }
            };

            let mut env = Environment::new();
            env.set_undefined_behavior(UndefinedBehavior::Strict);
            env.add_template_owned(view.to_string(), src)
                .map_err(|err| processing(view, &err))?;
            let env = Arc::new(env);

            if let Some(entries) = &self.entries {
                entries
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .put(key, env.clone());
            }
            tracing::debug!(view, %locale, path = %path.display(), "loaded template");
            return Ok(env);
        }

        Err(RenderError::NotFound {
            view: view.to_string(),
            locale: locale.to_string(),
        })
    }
}

impl Renderer for FileTemplates {
    fn render(&self, view: &str, model: &Value, locale: &Locale) -> Result<String, RenderError> {
        let env = self.load(view, locale)?;
        env.get_template(view)
            .and_then(|template| template.render(model))
            .map_err(|err| processing(view, &err))
    }
}

fn processing(view: &str, err: &minijinja::Error) -> RenderError {
    RenderError::Processing {
        view: view.to_string(),
        detail: err.to_string(),
    }
}

fn validate_view_name(view: &str) -> Result<(), RenderError> {
    let reason = if view.trim().is_empty() {
        Some("empty view name")
    } else if view.starts_with('/') || view.contains('\\') || view.contains(':') {
        Some("view name must be a relative path")
    } else if view.split('/').any(|seg| seg == ".." || seg == "." || seg.is_empty()) {
        Some("view name must not contain empty, '.' or '..' segments")
    } else if view.contains('\0') {
        Some("view name must not contain NUL")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(RenderError::MalformedName {
            view: view.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(()),
    }
}

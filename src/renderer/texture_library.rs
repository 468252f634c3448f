use std::collections::{HashMap, HashSet};

use ash::vk;

use super::texture::{Texture, TextureKind};

/// Anything that can be bound as a sampled image.
pub trait Sampled {
    fn view(&self) -> vk::ImageView;
}

impl Sampled for Texture {
    fn view(&self) -> vk::ImageView {
        Texture::view(self)
    }
}

struct Entry<T> {
    texture: T,
    ready: bool,
}

/// Outcome of [`TextureLibrary::insert_deferred`].
pub struct DeferredInsert<T> {
    /// Texture previously stored under the same name.
    pub replaced: Option<T>,
    /// The mips executed before the texture arrived; it is usable now.
    pub ready: bool,
}

/// Named textures plus one fallback per [`TextureKind`].
///
/// A texture inserted as deferred is not handed out until [`mark_ready`](Self::mark_ready)
/// is called for it; until then lookups resolve to the fallback of the requested kind.
pub struct TextureLibrary<T: Sampled = Texture> {
    textures: HashMap<String, Entry<T>>,
    fallbacks: HashMap<TextureKind, T>,
    // Ready notifications that arrived before the texture itself.
    early_ready: HashSet<String>,
}

impl<T: Sampled> Default for TextureLibrary<T> {
    fn default() -> Self {
        Self {
            textures: HashMap::new(),
            fallbacks: HashMap::new(),
            early_ready: HashSet::new(),
        }
    }
}

impl<T: Sampled> TextureLibrary<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fallback(&mut self, kind: TextureKind, texture: T) {
        self.fallbacks.insert(kind, texture);
    }

    pub fn fallback(&self, kind: TextureKind) -> Option<&T> {
        self.fallbacks.get(&kind)
    }

    /// Inserts a usable texture, returning the one it replaces.
    pub fn insert_ready(&mut self, name: &str, texture: T) -> Option<T> {
        self.early_ready.remove(name);
        self.textures
            .insert(
                name.to_string(),
                Entry {
                    texture,
                    ready: true,
                },
            )
            .map(|e| e.texture)
    }

    /// Inserts a texture whose mips are still being generated.
    ///
    /// If a ready notice for `name` arrived first, the texture is ready on
    /// insertion and the caller must rebuild whatever samples it.
    pub fn insert_deferred(&mut self, name: &str, texture: T) -> DeferredInsert<T> {
        let ready = self.early_ready.remove(name);
        let replaced = self
            .textures
            .insert(name.to_string(), Entry { texture, ready })
            .map(|e| e.texture);
        DeferredInsert { replaced, ready }
    }

    /// Returns `true` if the texture was present and is now usable.
    pub fn mark_ready(&mut self, name: &str) -> bool {
        match self.textures.get_mut(name) {
            Some(entry) => {
                entry.ready = true;
                true
            }
            None => {
                self.early_ready.insert(name.to_string());
                false
            }
        }
    }

    pub fn is_ready(&self, name: &str) -> bool {
        self.textures.get(name).is_some_and(|e| e.ready)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.textures.contains_key(name)
    }

    /// Ready texture by name.
    pub fn get(&self, name: &str) -> Option<&T> {
        self.textures
            .get(name)
            .filter(|e| e.ready)
            .map(|e| &e.texture)
    }

    /// View of `name` if it is ready, else of the fallback for `kind`.
    pub fn view_or_fallback(&self, name: Option<&str>, kind: TextureKind) -> vk::ImageView {
        name.and_then(|n| self.get(n))
            .or_else(|| self.fallback(kind))
            .map_or(vk::ImageView::null(), Sampled::view)
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    pub fn clear(&mut self) {
        self.textures.clear();
        self.fallbacks.clear();
        self.early_ready.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    struct FakeTexture(u64);

    impl Sampled for FakeTexture {
        fn view(&self) -> vk::ImageView {
            vk::ImageView::from_raw(self.0)
        }
    }

    fn library() -> TextureLibrary<FakeTexture> {
        let mut library = TextureLibrary::new();
        library.set_fallback(TextureKind::Diffuse, FakeTexture(100));
        library.set_fallback(TextureKind::Normal, FakeTexture(101));
        library
    }

    #[test]
    fn missing_texture_resolves_to_kind_fallback() {
        let library = library();
        assert_eq!(
            library.view_or_fallback(Some("brick"), TextureKind::Normal).as_raw(),
            101
        );
        assert_eq!(library.view_or_fallback(None, TextureKind::Diffuse).as_raw(), 100);
        assert_eq!(
            library.view_or_fallback(None, TextureKind::Emissive),
            vk::ImageView::null()
        );
    }

    #[test]
    fn deferred_texture_waits_for_ready() {
        let mut library = library();
        assert!(!library.insert_deferred("brick", FakeTexture(7)).ready);
        assert!(!library.is_ready("brick"));
        assert_eq!(
            library.view_or_fallback(Some("brick"), TextureKind::Diffuse).as_raw(),
            100
        );

        assert!(library.mark_ready("brick"));
        assert_eq!(
            library.view_or_fallback(Some("brick"), TextureKind::Diffuse).as_raw(),
            7
        );
    }

    #[test]
    fn ready_before_insert_is_remembered() {
        let mut library = library();
        assert!(!library.mark_ready("late"));
        let inserted = library.insert_deferred("late", FakeTexture(9));
        assert!(inserted.ready);
        assert!(inserted.replaced.is_none());
        assert!(library.is_ready("late"));

        // The notice is consumed by the first insertion.
        assert!(!library.insert_deferred("late", FakeTexture(10)).ready);
    }

    #[test]
    fn insert_returns_replaced_texture() {
        let mut library = library();
        assert!(library.insert_ready("a", FakeTexture(1)).is_none());
        let old = library.insert_ready("a", FakeTexture(2)).unwrap();
        assert_eq!(old.0, 1);
        assert_eq!(library.len(), 1);
    }
}

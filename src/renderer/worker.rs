//! Background asset thread.
//!
//! Jobs are queued at high or low priority and processed one at a time on a
//! single thread. Results come back over a channel that the frame loop drains
//! without blocking.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use uuid::Uuid;

use super::material::MaterialDesc;
use super::mipmap_channel::MipmapChannel;
use super::model::{MeshData, Model};
use super::texture::{record_mip_plan, PixelData, Texture, TextureKind, TextureUploader};
use crate::vulkan::allocator::Allocator;
use crate::vulkan::upload::UploadContext;
use crate::{RendererError, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Priority {
    High,
    Low,
}

/// Work executed on the worker thread.
pub trait JobHandler: Send + 'static {
    type Job: Send + 'static;
    type Output: Send + 'static;

    fn handle(&mut self, job: Self::Job) -> Self::Output;
}

struct Queues<J> {
    high: VecDeque<(Uuid, J)>,
    low: VecDeque<(Uuid, J)>,
    busy: bool,
    shutdown: bool,
}

impl<J> Queues<J> {
    fn pop(&mut self) -> Option<(Uuid, J)> {
        self.high.pop_front().or_else(|| self.low.pop_front())
    }

    fn is_idle(&self) -> bool {
        !self.busy && self.high.is_empty() && self.low.is_empty()
    }
}

struct Shared<J> {
    queues: Mutex<Queues<J>>,
    work: Condvar,
    idle: Condvar,
}

pub struct AssetWorker<H: JobHandler> {
    shared: Arc<Shared<H::Job>>,
    results: Receiver<(Uuid, H::Output)>,
    thread: Option<JoinHandle<()>>,
}

impl<H: JobHandler> AssetWorker<H> {
    pub fn spawn(handler: H) -> Result<Self> {
        let shared = Arc::new(Shared {
            queues: Mutex::new(Queues {
                high: VecDeque::new(),
                low: VecDeque::new(),
                busy: false,
                shutdown: false,
            }),
            work: Condvar::new(),
            idle: Condvar::new(),
        });
        let (sender, results) = crossbeam_channel::unbounded();

        let thread_shared = Arc::clone(&shared);
        let thread = std::thread::Builder::new()
            .name("asset-worker".into())
            .spawn(move || run(handler, &thread_shared, &sender))?;

        log::info!("Asset worker started");
        Ok(Self {
            shared,
            results,
            thread: Some(thread),
        })
    }

    /// Queues a job and returns its id. Jobs submitted after shutdown are dropped.
    pub fn submit(&self, job: H::Job, priority: Priority) -> Uuid {
        let id = Uuid::new_v4();
        let mut queues = self.shared.queues.lock();
        if queues.shutdown {
            log::warn!("Asset worker is shut down; dropping job {id}");
            return id;
        }
        match priority {
            Priority::High => queues.high.push_back((id, job)),
            Priority::Low => queues.low.push_back((id, job)),
        }
        self.shared.work.notify_one();
        id
    }

    /// Completed results, oldest first. Never blocks.
    pub fn drain(&self) -> Vec<(Uuid, H::Output)> {
        self.results.try_iter().collect()
    }

    /// Blocks until every queued job has been handled.
    pub fn wait_idle(&self) {
        let mut queues = self.shared.queues.lock();
        while !queues.is_idle() {
            self.shared.idle.wait(&mut queues);
        }
    }

    pub fn queued(&self) -> usize {
        let queues = self.shared.queues.lock();
        queues.high.len() + queues.low.len()
    }

    /// Drops queued jobs, lets the current one finish and joins the thread.
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        {
            let mut queues = self.shared.queues.lock();
            queues.shutdown = true;
            let dropped = queues.high.len() + queues.low.len();
            if dropped > 0 {
                log::warn!("Dropping {dropped} queued asset jobs");
            }
            queues.high.clear();
            queues.low.clear();
        }
        self.shared.work.notify_all();
        if thread.join().is_err() {
            log::error!("Asset worker panicked");
        }
        self.shared.idle.notify_all();
        log::info!("Asset worker stopped");
    }
}

impl<H: JobHandler> Drop for AssetWorker<H> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run<H: JobHandler>(mut handler: H, shared: &Shared<H::Job>, results: &Sender<(Uuid, H::Output)>) {
    loop {
        let (id, job) = {
            let mut queues = shared.queues.lock();
            loop {
                if let Some(job) = queues.pop() {
                    queues.busy = true;
                    break job;
                }
                if queues.shutdown {
                    return;
                }
                shared.idle.notify_all();
                shared.work.wait(&mut queues);
            }
        };

        let job_guard = JobGuard { shared };
        let output = handler.handle(job);
        // The receiver only disappears while the worker is being torn down.
        let _ = results.send((id, output));
        drop(job_guard);
    }
}

/// Ends a job's busy period, including when the handler panics.
///
/// A panic takes the thread down, so the remaining queue is dropped and the
/// worker is marked shut down; idle waiters are released either way.
struct JobGuard<'a, J> {
    shared: &'a Shared<J>,
}

impl<J> Drop for JobGuard<'_, J> {
    fn drop(&mut self) {
        let mut queues = self.shared.queues.lock();
        queues.busy = false;
        if std::thread::panicking() {
            let dropped = queues.high.len() + queues.low.len();
            log::error!("Asset job panicked; dropping {dropped} queued jobs");
            queues.shutdown = true;
            queues.high.clear();
            queues.low.clear();
        }
        if queues.is_idle() {
            self.shared.idle.notify_all();
        }
    }
}

/// Asset requests understood by [`GpuAssetLoader`].
pub enum AssetJob {
    /// Decode an image file and upload it with a deferred mip chain.
    TextureFile {
        name: String,
        path: PathBuf,
        kind: TextureKind,
    },
    /// Upload already decoded pixels with a deferred mip chain.
    TexturePixels { name: String, pixels: PixelData },
    /// Upload parsed geometry as a new model.
    Model {
        name: String,
        meshes: Vec<MeshData>,
        materials: Vec<MaterialDesc>,
    },
    /// Parse a glTF file, upload its meshes and queue its textures.
    #[cfg(feature = "gltf_loading")]
    Gltf { path: PathBuf },
}

impl AssetJob {
    pub fn name(&self) -> String {
        match self {
            AssetJob::TextureFile { name, .. }
            | AssetJob::TexturePixels { name, .. }
            | AssetJob::Model { name, .. } => name.clone(),
            #[cfg(feature = "gltf_loading")]
            AssetJob::Gltf { path } => path.display().to_string(),
        }
    }
}

/// Results posted back to the frame thread.
pub enum AssetEvent {
    /// `deferred` textures become usable once their mip batch has executed.
    TextureLoaded { texture: Texture, deferred: bool },
    ModelLoaded {
        model: Model,
        materials: Vec<MaterialDesc>,
    },
    Failed { name: String, error: RendererError },
}

/// Loads assets on the worker thread using the upload queue.
///
/// Mip chains are recorded into the shared [`MipmapChannel`] and run on the
/// graphics queue with a later frame.
pub struct GpuAssetLoader {
    allocator: Arc<Allocator>,
    upload: Arc<UploadContext>,
    textures: TextureUploader,
    mipmaps: Arc<MipmapChannel>,
}

impl GpuAssetLoader {
    pub fn new(
        allocator: Arc<Allocator>,
        upload: Arc<UploadContext>,
        textures: TextureUploader,
        mipmaps: Arc<MipmapChannel>,
    ) -> Self {
        Self {
            allocator,
            upload,
            textures,
            mipmaps,
        }
    }

    fn load_texture(&self, name: &str, pixels: &PixelData) -> Result<AssetEvent> {
        let pending = self.textures.upload_deferred(name, pixels)?;
        if pending.plan.is_empty() {
            return Ok(AssetEvent::TextureLoaded {
                texture: pending.texture,
                deferred: false,
            });
        }
        let image = pending.texture.image();
        self.mipmaps.record(name, |recorder, cmd| {
            record_mip_plan(recorder.device(), cmd, image, &pending.plan)
        })?;
        log::debug!(
            "Queued {} mip levels of '{name}' on the side channel",
            pending.texture.mip_levels()
        );
        Ok(AssetEvent::TextureLoaded {
            texture: pending.texture,
            deferred: true,
        })
    }

    fn load_model(&self, name: &str, meshes: &[MeshData], materials: Vec<MaterialDesc>) -> Result<AssetEvent> {
        let model = Model::upload(&self.allocator, &self.upload, name, meshes)?;
        log::info!("Loaded model '{name}' ({} meshes)", model.meshes.len());
        Ok(AssetEvent::ModelLoaded { model, materials })
    }

    #[cfg(feature = "gltf_loading")]
    fn load_gltf(&self, path: &std::path::Path) -> Vec<AssetEvent> {
        let scene = match super::gltf_loader::load_gltf(path) {
            Ok(scene) => scene,
            Err(error) => {
                return vec![AssetEvent::Failed {
                    name: path.display().to_string(),
                    error,
                }]
            }
        };
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("model")
            .to_string();

        let mut events: Vec<AssetEvent> = scene
            .textures
            .iter()
            .map(|texture| {
                PixelData::from_file(&texture.path, texture.kind)
                    .and_then(|pixels| self.load_texture(&texture.name, &pixels))
                    .unwrap_or_else(|error| AssetEvent::Failed {
                        name: texture.name.clone(),
                        error,
                    })
            })
            .collect();
        events.push(
            self.load_model(&name, &scene.meshes, scene.materials)
                .unwrap_or_else(|error| AssetEvent::Failed { name, error }),
        );
        events
    }
}

impl JobHandler for GpuAssetLoader {
    type Job = AssetJob;
    type Output = Vec<AssetEvent>;

    fn handle(&mut self, job: AssetJob) -> Vec<AssetEvent> {
        let name = job.name();
        let result = match job {
            AssetJob::TextureFile { name, path, kind } => PixelData::from_file(&path, kind)
                .and_then(|pixels| self.load_texture(&name, &pixels)),
            AssetJob::TexturePixels { name, pixels } => self.load_texture(&name, &pixels),
            AssetJob::Model {
                name,
                meshes,
                materials,
            } => self.load_model(&name, &meshes, materials),
            #[cfg(feature = "gltf_loading")]
            AssetJob::Gltf { path } => return self.load_gltf(&path),
        };
        vec![result.unwrap_or_else(|error| {
            log::warn!("Asset '{name}' failed to load: {error}");
            AssetEvent::Failed { name, error }
        })]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    struct Doubler;

    impl JobHandler for Doubler {
        type Job = u32;
        type Output = u32;

        fn handle(&mut self, job: u32) -> u32 {
            job * 2
        }
    }

    /// Blocks on job 0 until released.
    struct Gated {
        gate: Receiver<()>,
    }

    impl JobHandler for Gated {
        type Job = u32;
        type Output = u32;

        fn handle(&mut self, job: u32) -> u32 {
            if job == 0 {
                let _ = self.gate.recv();
            }
            job
        }
    }

    #[test]
    fn results_arrive_after_wait_idle() {
        let worker = AssetWorker::spawn(Doubler).unwrap();
        let a = worker.submit(1, Priority::Low);
        let b = worker.submit(5, Priority::High);
        worker.wait_idle();

        let results = worker.drain();
        assert_eq!(results.len(), 2);
        assert!(results.contains(&(a, 2)));
        assert!(results.contains(&(b, 10)));
        assert!(worker.drain().is_empty());
    }

    #[test]
    fn high_priority_jumps_the_queue() {
        let (release, gate) = bounded(1);
        let worker = AssetWorker::spawn(Gated { gate }).unwrap();
        worker.submit(0, Priority::Low);
        // Wait until the gated job is running so the rest queue up behind it.
        while worker.queued() > 0 {
            std::thread::yield_now();
        }
        worker.submit(1, Priority::Low);
        worker.submit(2, Priority::High);
        release.send(()).unwrap();
        worker.wait_idle();

        let order: Vec<u32> = worker.drain().into_iter().map(|(_, v)| v).collect();
        assert_eq!(order, vec![0, 2, 1]);
    }

    /// Panics on job 0 once released.
    struct Fragile {
        gate: Receiver<()>,
    }

    impl JobHandler for Fragile {
        type Job = u32;
        type Output = u32;

        fn handle(&mut self, job: u32) -> u32 {
            if job == 0 {
                let _ = self.gate.recv();
                panic!("corrupt asset");
            }
            job
        }
    }

    #[test]
    fn panicking_job_does_not_hang_wait_idle() {
        let (release, gate) = bounded(1);
        let worker = AssetWorker::spawn(Fragile { gate }).unwrap();
        worker.submit(0, Priority::High);
        while worker.queued() > 0 {
            std::thread::yield_now();
        }
        worker.submit(3, Priority::Low);
        release.send(()).unwrap();

        worker.wait_idle();
        assert_eq!(worker.queued(), 0);
        assert!(worker.drain().is_empty());

        worker.submit(4, Priority::High);
        assert_eq!(worker.queued(), 0);
    }

    #[test]
    fn shutdown_drops_queued_jobs() {
        let (release, gate) = bounded(1);
        let mut worker = AssetWorker::spawn(Gated { gate }).unwrap();
        worker.submit(0, Priority::High);
        while worker.queued() > 0 {
            std::thread::yield_now();
        }
        worker.submit(7, Priority::Low);
        release.send(()).unwrap();
        worker.shutdown();

        let values: Vec<u32> = worker.drain().into_iter().map(|(_, v)| v).collect();
        assert!(values.contains(&0));
        assert!(values.len() <= 2);
        worker.wait_idle();
        worker.submit(9, Priority::High);
        assert_eq!(worker.queued(), 0);
    }
}

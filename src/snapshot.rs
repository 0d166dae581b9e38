use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::template_fusion::FusedTemplate;

/// Celda con un valor inmutable que se reemplaza entero.
/// El lock solo se toma para clonar o cambiar el `Arc`.
pub struct SnapshotCell<T> {
    inner: RwLock<Arc<T>>,
}

impl<T> SnapshotCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(Arc::new(value)),
        }
    }

    /// Copia del handle actual; el valor nunca cambia bajo el lector
    pub fn load(&self) -> Arc<T> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Publica un valor nuevo y devuelve el anterior
    pub fn store(&self, value: T) -> Arc<T> {
        let next = Arc::new(value);
        match self.inner.write() {
            Ok(mut guard) => std::mem::replace(&mut *guard, next),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), next),
        }
    }
}

impl<T: Default> Default for SnapshotCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Estado publicado tras cada ciclo resuelto
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemplateSnapshot {
    /// Número de publicación, empieza en 0
    pub version: u64,
    pub fused: FusedTemplate,
    /// Normalidad del último ciclo completo, si lo hay
    pub last_normality: Option<f32>,
    pub confidence: f32,
}

impl TemplateSnapshot {
    pub fn initial(fused: FusedTemplate) -> Self {
        Self {
            version: 0,
            fused,
            last_normality: None,
            confidence: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn readers_keep_their_snapshot() {
        let cell = SnapshotCell::new(vec![1, 2, 3]);
        let before = cell.load();
        let old = cell.store(vec![4, 5, 6]);
        assert_eq!(*before, vec![1, 2, 3]);
        assert!(Arc::ptr_eq(&before, &old));
        assert_eq!(*cell.load(), vec![4, 5, 6]);
    }

    #[test]
    fn concurrent_readers_see_whole_values() {
        let cell = Arc::new(SnapshotCell::new(vec![0u32; 64]));
        let writer = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                for v in 1..200u32 {
                    cell.store(vec![v; 64]);
                }
            })
        };
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let cell = Arc::clone(&cell);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let snap = cell.load();
                        assert!(snap.iter().all(|x| *x == snap[0]));
                    }
                })
            })
            .collect();
        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(cell.load()[0], 199);
    }
}

//! Base de datos de plantillas de marcha personalizadas.
//!
//! Cada ciclo completo se acepta o rechaza con un criterio de densidad
//! inspirado en DBSCAN: se cuentan las entradas retenidas dentro de un radio
//! ε que se adapta a la distribución de distancias ya presente. Los ciclos
//! aceptados se guardan en una arena de capacidad fija con pesos por
//! antigüedad y densidad local; al superar la capacidad se expulsa la
//! entrada de menor peso.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::signal;
use crate::types::{CycleStatus, Decision, GaitCycle, RESAMPLE_LEN};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub resample_len: usize,
    /// Máximo de entradas retenidas
    pub max_entries: usize,
    /// Por debajo de este tamaño todo ciclo se admite
    pub bootstrap_entries: usize,
    /// Radio usado durante el arranque (deg·√L)
    pub bootstrap_radius: f32,
    /// Percentil de las distancias entre pares para ε
    pub epsilon_percentile: f32,
    /// Factor sobre el percentil
    pub radius_scale: f32,
    /// ε nunca baja de este valor
    pub radius_floor: f32,
    /// Vecinos mínimos dentro de ε para aceptar
    pub min_samples: usize,
    /// Decaimiento exponencial por orden de inserción
    pub decay_rate: f32,
    /// 0 = solo antigüedad, 1 = antigüedad × densidad
    pub density_weight: f32,
    /// Decisiones recientes para la confianza
    pub confidence_window: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            resample_len: RESAMPLE_LEN,
            max_entries: 40,
            bootstrap_entries: 5,
            bootstrap_radius: 60.0,
            epsilon_percentile: 90.0,
            radius_scale: 1.2,
            radius_floor: 5.0,
            min_samples: 3,
            decay_rate: 0.03,
            density_weight: 0.5,
            confidence_window: 20,
        }
    }
}

/// Entrada de la plantilla: el vector nunca cambia, solo el peso
#[derive(Debug, Clone)]
pub struct TemplateEntry {
    pub vector: Vec<f32>,
    pub weight: f32,
    /// Orden de inserción
    pub seq: u64,
    /// Fracción de las demás entradas dentro de ε
    pub density: f32,
}

/// Plantilla personalizada: media ponderada de las entradas retenidas
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PersonalizedTemplate {
    /// Vacío si la base de datos está vacía
    pub vector: Vec<f32>,
    pub entries: usize,
}

impl PersonalizedTemplate {
    pub fn is_empty(&self) -> bool {
        self.vector.is_empty()
    }
}

/// Diagnóstico de la última evaluación
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Screening {
    pub cycle_id: u64,
    pub epsilon: f32,
    pub neighbors: usize,
    pub required: usize,
    pub bootstrap: bool,
    pub decision: Decision,
}

/// Arena de capacidad fija con matriz de distancias cacheada
pub struct GaitDatabase {
    config: DatabaseConfig,
    slots: Vec<Option<TemplateEntry>>,
    free: Vec<usize>,
    /// distances[i * cap + j] entre los huecos i y j ocupados
    distances: Vec<f32>,
    next_seq: u64,
    template: PersonalizedTemplate,
    recent: VecDeque<Decision>,
    accepted: u64,
    rejected: u64,
    evicted: u64,
    last_screening: Option<Screening>,
}

impl GaitDatabase {
    pub fn new(config: DatabaseConfig) -> Self {
        // Un hueco extra: se inserta antes de expulsar
        let cap = config.max_entries.max(1) + 1;
        Self {
            slots: vec![None; cap],
            free: (0..cap).rev().collect(),
            distances: vec![0.0; cap * cap],
            next_seq: 0,
            template: PersonalizedTemplate::default(),
            recent: VecDeque::with_capacity(config.confidence_window.max(1)),
            accepted: 0,
            rejected: 0,
            evicted: 0,
            last_screening: None,
            config,
        }
    }

    fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    fn occupied(&self) -> impl Iterator<Item = (usize, &TemplateEntry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|e| (i, e)))
    }

    /// Entradas retenidas en orden de inserción
    pub fn entries(&self) -> Vec<&TemplateEntry> {
        let mut entries: Vec<&TemplateEntry> = self.occupied().map(|(_, e)| e).collect();
        entries.sort_by_key(|e| e.seq);
        entries
    }

    pub fn in_bootstrap(&self) -> bool {
        self.len() < self.config.bootstrap_entries
    }

    fn pairwise_distances(&self) -> Vec<f32> {
        let cap = self.capacity();
        let idx: Vec<usize> = self.occupied().map(|(i, _)| i).collect();
        let mut out = Vec::with_capacity(idx.len() * idx.len().saturating_sub(1) / 2);
        for (a, &i) in idx.iter().enumerate() {
            for &j in &idx[a + 1..] {
                out.push(self.distances[i * cap + j]);
            }
        }
        out
    }

    /// Radio ε actual
    pub fn epsilon(&self) -> f32 {
        if self.in_bootstrap() {
            return self.config.bootstrap_radius;
        }
        let mut pairs = self.pairwise_distances();
        let stat = signal::percentile(&mut pairs, self.config.epsilon_percentile);
        (stat * self.config.radius_scale).max(self.config.radius_floor)
    }

    /// Evalúa y, si procede, incorpora un ciclo completo.
    /// Un ciclo ya resuelto no se vuelve a evaluar.
    pub fn submit(&mut self, cycle: &mut GaitCycle) -> Decision {
        match cycle.status() {
            CycleStatus::Accepted => return Decision::Accepted,
            CycleStatus::Rejected => return Decision::Rejected,
            CycleStatus::Pending => {}
        }

        cycle.ensure_resampled(self.config.resample_len);
        if cycle.resampled.len() != self.config.resample_len {
            cycle.resampled = signal::resample_uniform(&cycle.resampled, self.config.resample_len);
        }
        let candidate = cycle.resampled.clone();

        let epsilon = self.epsilon();
        let bootstrap = self.in_bootstrap();
        let candidate_distances: Vec<(usize, f32)> = self
            .occupied()
            .map(|(i, e)| (i, signal::euclidean(&candidate, &e.vector)))
            .collect();
        let neighbors = candidate_distances
            .iter()
            .filter(|(_, d)| *d <= epsilon)
            .count();
        let required = if bootstrap { 0 } else { self.config.min_samples };

        let decision = if neighbors >= required {
            Decision::Accepted
        } else {
            Decision::Rejected
        };

        match decision {
            Decision::Accepted => {
                self.insert(candidate, &candidate_distances);
                self.accepted += 1;
            }
            Decision::Rejected => {
                self.rejected += 1;
            }
        }

        cycle.resolve(decision);
        self.record(decision);

        let screening = Screening {
            cycle_id: cycle.id,
            epsilon,
            neighbors,
            required,
            bootstrap,
            decision,
        };
        debug!(
            cycle = cycle.id,
            epsilon,
            neighbors,
            required,
            bootstrap,
            entries = self.len(),
            ?decision,
            "ciclo evaluado"
        );
        if bootstrap && !self.in_bootstrap() {
            info!(entries = self.len(), "plantilla personalizada fuera de arranque");
        }
        self.last_screening = Some(screening);
        decision
    }

    fn insert(&mut self, vector: Vec<f32>, distances: &[(usize, f32)]) {
        let Some(slot) = self.free.pop() else {
            // No ocurre: siempre queda el hueco extra tras expulsar
            return;
        };
        let cap = self.capacity();
        for &(j, d) in distances {
            self.distances[slot * cap + j] = d;
            self.distances[j * cap + slot] = d;
        }
        self.distances[slot * cap + slot] = 0.0;

        self.slots[slot] = Some(TemplateEntry {
            vector,
            weight: 0.0,
            seq: self.next_seq,
            density: 1.0,
        });
        self.next_seq += 1;

        self.recompute_weights();
        while self.len() > self.config.max_entries {
            self.evict_lowest();
            self.recompute_weights();
        }
        self.rebuild_template();
    }

    /// Expulsa la entrada de menor peso (empate: la más antigua)
    fn evict_lowest(&mut self) {
        let victim = self
            .occupied()
            .min_by(|(_, a), (_, b)| {
                a.weight
                    .partial_cmp(&b.weight)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.seq.cmp(&b.seq))
            })
            .map(|(i, _)| i);

        if let Some(i) = victim {
            if let Some(entry) = self.slots[i].take() {
                debug!(seq = entry.seq, weight = entry.weight, "entrada expulsada");
            }
            self.free.push(i);
            self.evicted += 1;
        }
    }

    fn recompute_weights(&mut self) {
        let n = self.len();
        if n == 0 {
            return;
        }
        let cap = self.capacity();
        let epsilon = self.epsilon();
        let newest = self.occupied().map(|(_, e)| e.seq).max().unwrap_or(0);
        let idx: Vec<usize> = self.occupied().map(|(i, _)| i).collect();

        let mut raw = Vec::with_capacity(n);
        for &i in &idx {
            let density = if n > 1 {
                let close = idx
                    .iter()
                    .filter(|&&j| j != i && self.distances[i * cap + j] <= epsilon)
                    .count();
                close as f32 / (n - 1) as f32
            } else {
                1.0
            };
            let seq = self.slots[i].as_ref().map(|e| e.seq).unwrap_or(newest);
            let age = (newest - seq) as f32;
            let recency = (-self.config.decay_rate * age).exp();
            let dw = self.config.density_weight.clamp(0.0, 1.0);
            raw.push((i, density, recency * ((1.0 - dw) + dw * density)));
        }

        let total: f32 = raw.iter().map(|(_, _, w)| w).sum();
        for (i, density, w) in raw {
            if let Some(entry) = self.slots[i].as_mut() {
                entry.density = density;
                entry.weight = if total > 0.0 { w / total } else { 1.0 / n as f32 };
            }
        }
    }

    fn rebuild_template(&mut self) {
        let len = self.config.resample_len;
        let mut vector = vec![0.0f32; len];
        let mut entries = 0;
        for (_, entry) in self.occupied() {
            for (acc, v) in vector.iter_mut().zip(&entry.vector) {
                *acc += entry.weight * v;
            }
            entries += 1;
        }
        if entries == 0 {
            vector.clear();
        }
        self.template = PersonalizedTemplate { vector, entries };
    }

    fn record(&mut self, decision: Decision) {
        self.recent.push_back(decision);
        if self.recent.len() > self.config.confidence_window.max(1) {
            self.recent.pop_front();
        }
    }

    pub fn current_template(&self) -> PersonalizedTemplate {
        self.template.clone()
    }

    /// Fracción de ciclos aceptados en la ventana reciente (1.0 sin historial)
    pub fn confidence(&self) -> f32 {
        if self.recent.is_empty() {
            return 1.0;
        }
        let accepted = self
            .recent
            .iter()
            .filter(|d| **d == Decision::Accepted)
            .count();
        accepted as f32 / self.recent.len() as f32
    }

    /// R = d_min / (1 + rechazados / retenidos)
    pub fn reliability_index(&self) -> f32 {
        if self.len() < 2 {
            return 0.0;
        }
        let d_min = self
            .pairwise_distances()
            .into_iter()
            .fold(f32::INFINITY, f32::min);
        d_min / (1.0 + self.rejected as f32 / self.len() as f32)
    }

    pub fn weight_sum(&self) -> f32 {
        self.occupied().map(|(_, e)| e.weight).sum()
    }

    pub fn last_screening(&self) -> Option<Screening> {
        self.last_screening
    }

    pub fn accepted_count(&self) -> u64 {
        self.accepted
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }

    pub fn evicted_count(&self) -> u64 {
        self.evicted
    }
}

impl Default for GaitDatabase {
    fn default() -> Self {
        Self::new(DatabaseConfig::default())
    }
}

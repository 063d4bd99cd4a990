/*
    Lachesis, onboard model-based prognostics
    Copyright (C) 2026 Lachesis Contributors

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use crate::comm::Communicator;
use crate::io::{ConfigError, ProgConfig};
use crate::model::Model;
use crate::observers::Observer;
use crate::predict::Predictor;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type ModelCtor = Box<dyn Fn(&ProgConfig) -> Result<Arc<dyn Model>, ConfigError> + Send + Sync>;
type ObserverCtor = Box<
    dyn Fn(Arc<dyn Model>, &ProgConfig) -> Result<Box<dyn Observer>, ConfigError> + Send + Sync,
>;
type PredictorCtor = Box<
    dyn Fn(Arc<dyn Model>, &ProgConfig) -> Result<Box<dyn Predictor>, ConfigError> + Send + Sync,
>;
type CommunicatorCtor =
    Box<dyn Fn(&ProgConfig) -> Result<Arc<dyn Communicator>, ConfigError> + Send + Sync>;

/// Maps component type names to constructors.
///
/// The registry is an explicit object: the hosting program builds one,
/// registers every concrete model, observer, predictor and communicator it
/// ships, and passes it by reference into [Prognoser::enable]. There are no
/// implicit registrations, and separate registries are fully isolated from
/// one another.
///
/// [Prognoser::enable]: crate::prognoser::Prognoser::enable
#[derive(Default)]
pub struct Registry {
    models: HashMap<String, ModelCtor>,
    observers: HashMap<String, ObserverCtor>,
    predictors: HashMap<String, PredictorCtor>,
    communicators: HashMap<String, CommunicatorCtor>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_model<F>(&mut self, name: impl Into<String>, ctor: F)
    where
        F: Fn(&ProgConfig) -> Result<Arc<dyn Model>, ConfigError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.models.insert(name.clone(), Box::new(ctor)).is_some() {
            warn!("model type {name} re-registered, previous constructor replaced");
        }
    }

    pub fn register_observer<F>(&mut self, name: impl Into<String>, ctor: F)
    where
        F: Fn(Arc<dyn Model>, &ProgConfig) -> Result<Box<dyn Observer>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        if self.observers.insert(name.clone(), Box::new(ctor)).is_some() {
            warn!("observer type {name} re-registered, previous constructor replaced");
        }
    }

    pub fn register_predictor<F>(&mut self, name: impl Into<String>, ctor: F)
    where
        F: Fn(Arc<dyn Model>, &ProgConfig) -> Result<Box<dyn Predictor>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        if self
            .predictors
            .insert(name.clone(), Box::new(ctor))
            .is_some()
        {
            warn!("predictor type {name} re-registered, previous constructor replaced");
        }
    }

    pub fn register_communicator<F>(&mut self, name: impl Into<String>, ctor: F)
    where
        F: Fn(&ProgConfig) -> Result<Arc<dyn Communicator>, ConfigError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self
            .communicators
            .insert(name.clone(), Box::new(ctor))
            .is_some()
        {
            warn!("communicator type {name} re-registered, previous constructor replaced");
        }
    }

    pub fn create_model(
        &self,
        name: &str,
        cfg: &ProgConfig,
    ) -> Result<Arc<dyn Model>, ConfigError> {
        let ctor = self.models.get(name).ok_or_else(|| ConfigError::UnknownType {
            kind: "model",
            name: name.to_string(),
        })?;
        ctor(cfg)
    }

    pub fn create_observer(
        &self,
        name: &str,
        model: Arc<dyn Model>,
        cfg: &ProgConfig,
    ) -> Result<Box<dyn Observer>, ConfigError> {
        let ctor = self
            .observers
            .get(name)
            .ok_or_else(|| ConfigError::UnknownType {
                kind: "observer",
                name: name.to_string(),
            })?;
        ctor(model, cfg)
    }

    pub fn create_predictor(
        &self,
        name: &str,
        model: Arc<dyn Model>,
        cfg: &ProgConfig,
    ) -> Result<Box<dyn Predictor>, ConfigError> {
        let ctor = self
            .predictors
            .get(name)
            .ok_or_else(|| ConfigError::UnknownType {
                kind: "predictor",
                name: name.to_string(),
            })?;
        ctor(model, cfg)
    }

    pub fn create_communicator(
        &self,
        name: &str,
        cfg: &ProgConfig,
    ) -> Result<Arc<dyn Communicator>, ConfigError> {
        let ctor = self
            .communicators
            .get(name)
            .ok_or_else(|| ConfigError::UnknownType {
                kind: "communicator",
                name: name.to_string(),
            })?;
        ctor(cfg)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Registry")
            .field("models", &self.models.keys().collect::<Vec<_>>())
            .field("observers", &self.observers.keys().collect::<Vec<_>>())
            .field("predictors", &self.predictors.keys().collect::<Vec<_>>())
            .field(
                "communicators",
                &self.communicators.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}

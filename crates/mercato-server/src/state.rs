/*
 *  Copyright 2025-2026 Mercato Contributors
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

use std::sync::Arc;

use mercato::{ActionRegistry, CoreConfig, DAL};

/// Shared state handed to every route handler.
#[derive(Clone)]
pub struct AppState {
    pub dal: DAL,
    pub registry: Arc<ActionRegistry>,
    pub config: CoreConfig,
}

impl AppState {
    pub fn new(dal: DAL, registry: Arc<ActionRegistry>, config: CoreConfig) -> Self {
        Self {
            dal,
            registry,
            config,
        }
    }
}

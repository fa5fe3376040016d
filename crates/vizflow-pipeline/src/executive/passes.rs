//! The three request passes of an update.

use std::sync::Arc;

use vizflow_core::TimeStamp;

use super::events::emit;
use super::{CancellationToken, Connection, Node, NodeId, Pipeline, PipelineEvent, PortState};
use crate::algorithm::{describe_output, ExecuteContext};
use crate::cache::CacheKey;
use crate::data::{DataInformation, DataObject, ImageData};
use crate::error::{PipelineError, Result};
use crate::extent::Extent;
use crate::information::{CombineMode, OutputInformation, UpdateRequest};

/// Bookkeeping for a single update, indexed by node.
struct UpdatePass {
    order: Vec<NodeId>,
    pipeline_mtime: Vec<TimeStamp>,
    scheduled: Vec<bool>,
    empty_piece: Vec<bool>,
}

impl UpdatePass {
    fn new(order: Vec<NodeId>, nodes: usize) -> Self {
        Self {
            order,
            pipeline_mtime: vec![TimeStamp::ZERO; nodes],
            scheduled: vec![false; nodes],
            empty_piece: vec![false; nodes],
        }
    }
}

impl Pipeline {
    /// Brings output port 0 of `node` up to date.
    pub fn update(&mut self, node: NodeId) -> Result<()> {
        self.update_port(node, 0)
    }

    /// Brings an output port up to date with its current request.
    pub fn update_port(&mut self, node: NodeId, port: usize) -> Result<()> {
        self.update_with(node, port, &CancellationToken::new())
    }

    /// Like [`update_port`](Self::update_port), checking `token` before each
    /// algorithm executes.
    pub fn update_with(
        &mut self,
        node: NodeId,
        port: usize,
        token: &CancellationToken,
    ) -> Result<()> {
        self.port(node, port)?;
        let mut pass = self.begin_pass(node);
        let result = self.run_pass(&mut pass, node, port, token);
        self.end_pass(&pass);
        if let Err(err) = &result {
            log::warn!("update of {node}:{port} failed: {err}");
        }
        result
    }

    /// Runs only the `RequestInformation` pass for `node` and its inputs.
    pub fn update_information(&mut self, node: NodeId) -> Result<()> {
        self.node(node)?;
        let mut pass = self.begin_pass(node);
        let result = self.information_pass(&mut pass);
        self.end_pass(&pass);
        result
    }

    fn begin_pass(&mut self, node: NodeId) -> UpdatePass {
        let pass = UpdatePass::new(self.upstream_order(node), self.nodes.len());
        for id in &pass.order {
            for state in &mut self.nodes[id.0].outputs {
                state.combined = Extent::EMPTY;
                state.pass_request = None;
            }
        }
        pass
    }

    fn end_pass(&mut self, pass: &UpdatePass) {
        for id in &pass.order {
            for state in &mut self.nodes[id.0].outputs {
                state.combined = Extent::EMPTY;
                state.pass_request = None;
            }
        }
    }

    fn run_pass(
        &mut self,
        pass: &mut UpdatePass,
        node: NodeId,
        port: usize,
        token: &CancellationToken,
    ) -> Result<()> {
        self.information_pass(pass)?;

        for id in &pass.order {
            for state in &mut self.nodes[id.0].outputs {
                state.update_extent = Extent::EMPTY;
            }
        }
        let request = self.port(node, port)?.requested.clone();
        self.propagate(pass, node, port, request)?;
        self.prune_schedule(pass, node);

        self.data_pass(pass, token)?;

        if self.options.release_data_after_use {
            for id in pass.order.iter().filter(|&&id| id != node) {
                for state in &mut self.nodes[id.0].outputs {
                    state.data = None;
                }
            }
        }
        Ok(())
    }

    fn information_pass(&mut self, pass: &mut UpdatePass) -> Result<()> {
        for &id in &pass.order {
            let node = &self.nodes[id.0];
            let mut mtime = node.modified;
            for connection in node.inputs.iter().flatten() {
                mtime = mtime.max(pass.pipeline_mtime[connection.node.0]);
            }
            pass.pipeline_mtime[id.0] = mtime;

            if node.information_time >= mtime {
                continue;
            }

            for (port, connections) in node.inputs.iter().enumerate() {
                if connections.is_empty() && !node.algorithm.input_port_optional(port) {
                    return Err(PipelineError::MissingInput { node: id, port });
                }
            }
            let inputs = self.connection_information(&node.inputs);

            let mut infos = vec![OutputInformation::default(); node.outputs.len()];
            let node = &mut self.nodes[id.0];
            if let Err(err) = node.algorithm.request_information(&inputs, &mut infos) {
                return Err(fail(node, id, err));
            }
            for (state, info) in node.outputs.iter_mut().zip(infos) {
                state.information = info;
            }
            node.information_time = self.clock.tick();
            log::debug!("{} ({id}) updated information", node.algorithm.type_name());
        }
        Ok(())
    }

    /// `RequestUpdateExtent` for one output port, recursing upstream.
    fn propagate(
        &mut self,
        pass: &mut UpdatePass,
        id: NodeId,
        port: usize,
        request: UpdateRequest,
    ) -> Result<()> {
        let pipeline_mtime = pass.pipeline_mtime[id.0];
        let node = &mut self.nodes[id.0];
        let Admitted {
            requested,
            empty_piece,
            mut merged,
        } = match admit(&node.outputs[port], id, port, &request) {
            Ok(admitted) => admitted,
            Err(err) => return Err(reject(node, id, err)),
        };

        let state = &mut node.outputs[port];
        state.combined = match request.mode {
            CombineMode::Replace => requested,
            CombineMode::Combine => state.combined.union(&requested),
        };
        let combined = state.combined;
        state.update_extent = combined;
        merged.extent = Some(combined);
        state.pass_request = Some(merged.clone());

        if port == 0 {
            if let Some(cache) = node.cache.as_mut() {
                cache.purge_older_than(pipeline_mtime);
                if let Some(hit) = cache.get(&CacheKey::new(combined, &merged)) {
                    log::debug!(
                        "{} ({id}) served {combined} from cache",
                        node.algorithm.type_name()
                    );
                    let state = &mut node.outputs[0];
                    state.data = Some(hit);
                    state.previous_time_request = merged.time;
                    pass.scheduled[id.0] = false;
                    emit(&mut node.observers, id, &PipelineEvent::CacheHit);
                    return Ok(());
                }
            }
        }

        let state = &node.outputs[port];
        let needs_execution = pass.scheduled[id.0]
            || match &state.data {
                None => true,
                Some(data) => {
                    let held = data.information();
                    pipeline_mtime > node.executed
                        || held.number_of_pieces != merged.number_of_pieces
                        || held.piece != merged.piece
                        || held.ghost_levels < merged.ghost_levels
                        || !held.extent.contains(&combined)
                        || (merged.exact_extent && held.extent != combined)
                        || needs_new_time_step(
                            &state.information,
                            &merged,
                            state.previous_time_request,
                            held,
                        )
                }
            };
        if !needs_execution {
            return Ok(());
        }

        pass.scheduled[id.0] = true;
        if empty_piece {
            pass.empty_piece[id.0] = true;
            return Ok(());
        }

        // Default upstream request: the merged request, less its local flags.
        let mut forwarded = merged.clone();
        forwarded.exact_extent = false;
        forwarded.mode = CombineMode::Combine;
        let connections = node.inputs.clone();
        let mut input_requests: Vec<Vec<UpdateRequest>> = connections
            .iter()
            .map(|port| vec![forwarded.clone(); port.len()])
            .collect();
        let input_information = self.connection_information(&connections);

        let node = &mut self.nodes[id.0];
        let outcome = node.algorithm.request_update_extent(
            port,
            &merged,
            &mut input_requests,
            &input_information,
        );
        if let Err(err) = outcome {
            return Err(fail(node, id, err));
        }
        log::debug!(
            "{} ({id}) port {port} requests {combined} upstream",
            node.algorithm.type_name()
        );

        for (requests, connections) in input_requests.into_iter().zip(connections) {
            for (request, connection) in requests.into_iter().zip(connections) {
                self.propagate(pass, connection.node, connection.port, request)?;
            }
        }
        Ok(())
    }

    /// Unschedules nodes that no longer feed anything that executes, such as
    /// the upstream of a port a later visit answered from its cache.
    fn prune_schedule(&self, pass: &mut UpdatePass, root: NodeId) {
        let mut live = vec![false; self.nodes.len()];
        live[root.0] = true;
        for &id in pass.order.iter().rev() {
            if !live[id.0] {
                if pass.scheduled[id.0] {
                    log::debug!("{id} no longer needs to execute");
                }
                pass.scheduled[id.0] = false;
                continue;
            }
            if !pass.scheduled[id.0] || pass.empty_piece[id.0] {
                continue;
            }
            for connection in self.nodes[id.0].inputs.iter().flatten() {
                live[connection.node.0] = true;
            }
        }
    }

    fn data_pass(&mut self, pass: &UpdatePass, token: &CancellationToken) -> Result<()> {
        for &id in &pass.order {
            if !pass.scheduled[id.0] {
                continue;
            }
            if token.is_cancelled() {
                log::warn!("update cancelled before {id} executed");
                return Err(PipelineError::Cancelled(id));
            }
            if pass.empty_piece[id.0] {
                self.publish_empty_piece(id);
                continue;
            }
            self.execute(id)?;
        }
        Ok(())
    }

    fn publish_empty_piece(&mut self, id: NodeId) {
        let executed = self.clock.tick();
        let node = &mut self.nodes[id.0];
        for state in &mut node.outputs {
            let request = state.pass_request.clone().unwrap_or_default();
            let image = ImageData::new(Extent::EMPTY, state.information.number_of_components);
            let info = DataInformation {
                extent: Extent::EMPTY,
                piece: request.piece,
                number_of_pieces: request.number_of_pieces,
                ghost_levels: request.ghost_levels,
                time_step: None,
            };
            state.data = Some(Arc::new(DataObject::with_information(image, info)));
            state.data_time = executed;
            state.previous_time_request = request.time;
        }
        node.executed = executed;
        log::debug!("{} ({id}) produced an empty piece", node.algorithm.type_name());
    }

    /// `RequestData` for one node. Outputs are published only if the
    /// algorithm succeeds and fills every requested port.
    fn execute(&mut self, id: NodeId) -> Result<()> {
        let mut inputs = Vec::with_capacity(self.nodes[id.0].inputs.len());
        for (port, connections) in self.nodes[id.0].inputs.iter().enumerate() {
            let mut port_inputs = Vec::with_capacity(connections.len());
            for connection in connections {
                let data = self.nodes[connection.node.0].outputs[connection.port]
                    .data
                    .clone()
                    .ok_or(PipelineError::MissingInput { node: id, port })?;
                port_inputs.push(data);
            }
            inputs.push(port_inputs);
        }

        let node = &mut self.nodes[id.0];
        let information: Vec<OutputInformation> =
            node.outputs.iter().map(|s| s.information.clone()).collect();
        let requests: Vec<UpdateRequest> = node
            .outputs
            .iter()
            .map(|s| s.pass_request.clone().unwrap_or_default())
            .collect();
        let extents: Vec<Extent> = node
            .outputs
            .iter()
            .map(|s| execution_extent(&s.information, s.pass_request.as_ref(), s.combined))
            .collect();
        let requested: Vec<bool> = node.outputs.iter().map(|s| s.pass_request.is_some()).collect();

        log::debug!(
            "{} ({id}) executing over {}",
            node.algorithm.type_name(),
            extents.first().copied().unwrap_or(Extent::EMPTY)
        );
        emit(&mut node.observers, id, &PipelineEvent::StartExecute);

        let Node {
            algorithm,
            observers,
            ..
        } = &mut *node;
        let mut progress = |amount: f64| emit(observers, id, &PipelineEvent::Progress(amount));
        let mut ctx = ExecuteContext::new(
            id,
            inputs,
            &information,
            requests.clone(),
            extents,
            &mut progress,
        );
        let outcome = algorithm.request_data(&mut ctx);
        let produced = ctx.into_outputs();

        if let Err(err) = outcome {
            return Err(fail(node, id, err));
        }
        if let Some(port) = produced
            .iter()
            .zip(&requested)
            .position(|(output, &wanted)| wanted && output.is_none())
        {
            let err = PipelineError::AlgorithmFailed(format!(
                "{} produced no output on port {port}",
                node.algorithm.type_name()
            ));
            return Err(fail(node, id, err));
        }

        let executed = self.clock.tick();
        let node = &mut self.nodes[id.0];
        for (port, output) in produced.into_iter().enumerate() {
            let Some((data, time_step)) = output else {
                continue;
            };
            let state = &mut node.outputs[port];
            let request = &requests[port];
            let mut data = data;
            let cropped = request.exact_extent && !state.combined.is_empty();
            if cropped && data.extent() != state.combined {
                data = Arc::new(DataObject::new(data.image().crop(&state.combined)));
            }
            let info = describe_output(&data, request, time_step);
            if data.information() != &info {
                let image = Arc::try_unwrap(data)
                    .map_or_else(|shared| shared.image().clone(), DataObject::into_image);
                data = Arc::new(DataObject::with_information(image, info));
            }

            if port == 0 {
                if let Some(cache) = node.cache.as_mut() {
                    let key = CacheKey::new(state.combined, request);
                    cache.insert(key, Arc::clone(&data), executed);
                }
            }
            state.data = Some(data);
            state.data_time = executed;
            state.previous_time_request = request.time;
        }
        node.executed = executed;
        emit(&mut node.observers, id, &PipelineEvent::EndExecute);
        Ok(())
    }
}

impl Pipeline {
    /// Information of every upstream port, per input port and connection.
    fn connection_information(&self, inputs: &[Vec<Connection>]) -> Vec<Vec<OutputInformation>> {
        inputs
            .iter()
            .map(|connections| {
                connections
                    .iter()
                    .map(|c| self.nodes[c.node.0].outputs[c.port].information.clone())
                    .collect()
            })
            .collect()
    }
}

/// A request a port has accepted, before it is combined.
struct Admitted {
    requested: Extent,
    empty_piece: bool,
    merged: UpdateRequest,
}

/// Checks `request` against the port's information and against what other
/// consumers already asked of it during this pass.
fn admit(state: &PortState, id: NodeId, port: usize, request: &UpdateRequest) -> Result<Admitted> {
    let info = &state.information;
    let whole = info
        .whole_extent
        .ok_or(PipelineError::MissingWholeExtent { node: id, port })?;

    if request.number_of_pieces == 0 || request.piece >= request.number_of_pieces {
        return Err(PipelineError::UnsupportedStreaming {
            node: id,
            port,
            reason: format!(
                "piece {} of {} does not exist",
                request.piece, request.number_of_pieces
            ),
        });
    }

    let empty_piece =
        request.piece > 0 && !info.can_produce_sub_extent && !info.can_handle_piece_request;
    let requested = if empty_piece {
        Extent::EMPTY
    } else {
        request.resolve_extent(&whole).unwrap_or(Extent::EMPTY)
    };
    if !requested.is_empty() && !whole.contains(&requested) {
        return Err(PipelineError::ExtentOutOfBounds {
            node: id,
            port,
            requested,
            whole,
        });
    }

    let mut merged = request.clone();
    if let Some(previous) = &state.pass_request {
        let pieces = (previous.piece, previous.number_of_pieces);
        if pieces != (request.piece, request.number_of_pieces) {
            return Err(PipelineError::UnsupportedStreaming {
                node: id,
                port,
                reason: format!(
                    "consumers requested piece {}/{} and piece {}/{}",
                    previous.piece,
                    previous.number_of_pieces,
                    request.piece,
                    request.number_of_pieces
                ),
            });
        }
        if previous.time.map(f64::to_bits) != request.time.map(f64::to_bits) {
            return Err(PipelineError::UnsupportedStreaming {
                node: id,
                port,
                reason: format!(
                    "consumers requested times {:?} and {:?}",
                    previous.time, request.time
                ),
            });
        }
        merged.ghost_levels = merged.ghost_levels.max(previous.ghost_levels);
        merged.exact_extent |= previous.exact_extent;
    }
    Ok(Admitted {
        requested,
        empty_piece,
        merged,
    })
}

/// Reports a request the port cannot satisfy. The error is returned as is.
fn reject(node: &mut Node, id: NodeId, err: PipelineError) -> PipelineError {
    log::error!("{} ({id}) rejected request: {err}", node.algorithm.type_name());
    emit(&mut node.observers, id, &PipelineEvent::Failed(err.to_string()));
    err
}

/// Reports a failed pass to observers and wraps the error with its node.
fn fail(node: &mut Node, id: NodeId, err: PipelineError) -> PipelineError {
    let algorithm = node.algorithm.type_name();
    log::error!("{algorithm} ({id}) failed: {err}");
    emit(&mut node.observers, id, &PipelineEvent::Failed(err.to_string()));
    PipelineError::UpstreamFailure {
        node: id,
        algorithm,
        source: Box::new(err),
    }
}

/// The extent an output port is produced over.
fn execution_extent(
    info: &OutputInformation,
    request: Option<&UpdateRequest>,
    combined: Extent,
) -> Extent {
    let whole = info.whole_extent.unwrap_or(Extent::EMPTY);
    match request {
        Some(_) if info.can_produce_sub_extent => combined,
        _ => whole,
    }
}

/// Whether a time-varying port must execute again for `request`.
///
/// Asking for the time that produced the current data does not count as a
/// change, even when the producer snapped it to a different step.
fn needs_new_time_step(
    info: &OutputInformation,
    request: &UpdateRequest,
    previous_request: Option<f64>,
    held: &DataInformation,
) -> bool {
    let Some(time) = request.time else {
        return false;
    };
    if !info.is_time_varying() || previous_request == Some(time) {
        return false;
    }
    held.time_step != Some(time)
}

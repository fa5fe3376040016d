//! The demand-driven streaming executive.
//!
//! A [`Pipeline`] owns algorithms as nodes of a directed acyclic graph and
//! drives them through the three request passes whenever an output is
//! updated:
//!
//! 1. `RequestInformation` upstream-first, refreshing whole extents and
//!    time steps for nodes modified since the last pass.
//! 2. `RequestUpdateExtent` from the requested port back to the sources.
//!    Every output port unions the requests it receives into a combined
//!    update extent and decides whether its data must be regenerated.
//! 3. `RequestData` upstream-first for the nodes that must execute.
//!
//! Nodes created with [`Pipeline::add_cached_algorithm`] keep an
//! [`ExtentCache`] of previous outputs and answer matching requests from it
//! without executing anything upstream.

mod events;
mod passes;

use std::fmt;
use std::sync::Arc;

use vizflow_core::{ModifiedClock, PipelineOptions, TimeStamp};

use crate::algorithm::Algorithm;
use crate::cache::ExtentCache;
use crate::data::DataObject;
use crate::error::{PipelineError, Result};
use crate::extent::Extent;
use crate::information::{CombineMode, OutputInformation, UpdateRequest};

pub use events::{CancellationToken, PipelineCallback, PipelineEvent};

/// Handle to a node in a [`Pipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}", self.0)
    }
}

/// An upstream output port feeding an input port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Connection {
    pub node: NodeId,
    pub port: usize,
}

/// Executive state of one output port.
#[derive(Debug, Clone, Default)]
pub struct PortState {
    information: OutputInformation,
    requested: UpdateRequest,
    pass_request: Option<UpdateRequest>,
    combined: Extent,
    update_extent: Extent,
    data: Option<Arc<DataObject>>,
    data_time: TimeStamp,
    previous_time_request: Option<f64>,
}

impl PortState {
    fn new(ghost_levels: u32) -> Self {
        Self {
            requested: UpdateRequest {
                ghost_levels,
                ..UpdateRequest::default()
            },
            ..Self::default()
        }
    }

    /// Information from the last `RequestInformation` pass.
    pub fn information(&self) -> &OutputInformation {
        &self.information
    }

    /// The request used when this port is updated directly.
    pub fn request(&self) -> &UpdateRequest {
        &self.requested
    }

    /// Union of the requests received in the running pass.
    pub fn combined_update_extent(&self) -> Extent {
        self.combined
    }

    /// The extent the last pass settled on for this port.
    pub fn update_extent(&self) -> Extent {
        self.update_extent
    }

    /// The published data, if any.
    pub fn data(&self) -> Option<&Arc<DataObject>> {
        self.data.as_ref()
    }

    /// When the data was last produced.
    pub fn data_time(&self) -> TimeStamp {
        self.data_time
    }
}

struct Node {
    algorithm: Box<dyn Algorithm>,
    inputs: Vec<Vec<Connection>>,
    outputs: Vec<PortState>,
    modified: TimeStamp,
    information_time: TimeStamp,
    executed: TimeStamp,
    cache: Option<ExtentCache>,
    observers: Vec<PipelineCallback>,
}

/// A graph of algorithms updated on demand.
pub struct Pipeline {
    nodes: Vec<Node>,
    clock: ModifiedClock,
    options: PipelineOptions,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// Creates an empty pipeline with default options.
    pub fn new() -> Self {
        Self::with_options(PipelineOptions::default())
    }

    pub fn with_options(options: PipelineOptions) -> Self {
        Self {
            nodes: Vec::new(),
            clock: ModifiedClock::new(),
            options,
        }
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Adds an algorithm under the streaming executive.
    pub fn add_algorithm(&mut self, algorithm: impl Algorithm) -> NodeId {
        self.push_node(Box::new(algorithm), None)
    }

    /// Adds an algorithm under the cached streaming executive.
    ///
    /// The cache holds `default_cache_size` outputs of the first output port.
    pub fn add_cached_algorithm(&mut self, algorithm: impl Algorithm) -> NodeId {
        let cache = ExtentCache::new(self.options.default_cache_size);
        self.push_node(Box::new(algorithm), Some(cache))
    }

    fn push_node(&mut self, algorithm: Box<dyn Algorithm>, cache: Option<ExtentCache>) -> NodeId {
        let id = NodeId(self.nodes.len());
        let ghost_levels = self.options.default_ghost_levels;
        log::debug!("adding {} as {id}", algorithm.type_name());
        self.nodes.push(Node {
            inputs: vec![Vec::new(); algorithm.number_of_input_ports()],
            outputs: (0..algorithm.number_of_output_ports())
                .map(|_| PortState::new(ghost_levels))
                .collect(),
            algorithm,
            modified: self.clock.tick(),
            information_time: TimeStamp::ZERO,
            executed: TimeStamp::ZERO,
            cache,
            observers: Vec::new(),
        });
        id
    }

    fn node(&self, id: NodeId) -> Result<&Node> {
        self.nodes.get(id.0).ok_or(PipelineError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(id.0).ok_or(PipelineError::UnknownNode(id))
    }

    fn port(&self, id: NodeId, port: usize) -> Result<&PortState> {
        self.node(id)?
            .outputs
            .get(port)
            .ok_or(PipelineError::InvalidPort {
                node: id,
                kind: "output",
                port,
            })
    }

    fn port_mut(&mut self, id: NodeId, port: usize) -> Result<&mut PortState> {
        self.node_mut(id)?
            .outputs
            .get_mut(port)
            .ok_or(PipelineError::InvalidPort {
                node: id,
                kind: "output",
                port,
            })
    }

    /// Connects output `from_port` of `from` to input `to_port` of `to`.
    ///
    /// A repeatable input port gains a connection; any other input port has
    /// its connection replaced.
    pub fn connect(
        &mut self,
        from: NodeId,
        from_port: usize,
        to: NodeId,
        to_port: usize,
    ) -> Result<()> {
        self.port(from, from_port)?;
        let target = self.node(to)?;
        if to_port >= target.inputs.len() {
            return Err(PipelineError::InvalidPort {
                node: to,
                kind: "input",
                port: to_port,
            });
        }
        if from == to || self.upstream_order(from).contains(&to) {
            return Err(PipelineError::WouldCreateCycle { from, to });
        }

        let connection = Connection {
            node: from,
            port: from_port,
        };
        let modified = self.clock.tick();
        let target = self.node_mut(to)?;
        if target.algorithm.input_port_repeatable(to_port) {
            target.inputs[to_port].push(connection);
        } else {
            target.inputs[to_port] = vec![connection];
        }
        target.modified = modified;
        log::debug!("connected {from}:{from_port} -> {to}:{to_port}");
        Ok(())
    }

    /// Removes a connection. Returns false if it did not exist.
    pub fn disconnect(
        &mut self,
        from: NodeId,
        from_port: usize,
        to: NodeId,
        to_port: usize,
    ) -> Result<bool> {
        let modified = self.clock.tick();
        let target = self.node_mut(to)?;
        let Some(connections) = target.inputs.get_mut(to_port) else {
            return Err(PipelineError::InvalidPort {
                node: to,
                kind: "input",
                port: to_port,
            });
        };
        let before = connections.len();
        connections.retain(|c| !(c.node == from && c.port == from_port));
        let removed = connections.len() != before;
        if removed {
            target.modified = modified;
        }
        Ok(removed)
    }

    /// Connections feeding input `port` of `node`.
    pub fn input_connections(&self, node: NodeId, port: usize) -> Result<&[Connection]> {
        self.node(node)?
            .inputs
            .get(port)
            .map(Vec::as_slice)
            .ok_or(PipelineError::InvalidPort {
                node,
                kind: "input",
                port,
            })
    }

    /// Borrows the algorithm of `node` as `T`.
    pub fn algorithm<T: Algorithm>(&self, node: NodeId) -> Option<&T> {
        self.nodes.get(node.0)?.algorithm.as_any().downcast_ref::<T>()
    }

    /// Mutably borrows the algorithm of `node` as `T`, marking it modified.
    pub fn algorithm_mut<T: Algorithm>(&mut self, node: NodeId) -> Option<&mut T> {
        let modified = self.clock.tick();
        let entry = self.nodes.get_mut(node.0)?;
        let algorithm = entry.algorithm.as_any_mut().downcast_mut::<T>()?;
        entry.modified = modified;
        Some(algorithm)
    }

    /// Name of the algorithm at `node`.
    pub fn type_name(&self, node: NodeId) -> Result<&'static str> {
        Ok(self.node(node)?.algorithm.type_name())
    }

    /// Marks `node` modified so the next update re-executes it.
    pub fn modified(&mut self, node: NodeId) -> Result<()> {
        let modified = self.clock.tick();
        self.node_mut(node)?.modified = modified;
        Ok(())
    }

    /// When `node` was last modified.
    pub fn modified_time(&self, node: NodeId) -> Result<TimeStamp> {
        Ok(self.node(node)?.modified)
    }

    // Request setters

    pub fn set_update_extent(&mut self, node: NodeId, port: usize, extent: Extent) -> Result<()> {
        self.port_mut(node, port)?.requested.extent = Some(extent);
        Ok(())
    }

    /// Requests the whole extent as a single piece.
    pub fn set_update_extent_to_whole_extent(&mut self, node: NodeId, port: usize) -> Result<()> {
        let ghost_levels = self.options.default_ghost_levels;
        let request = &mut self.port_mut(node, port)?.requested;
        request.extent = None;
        request.piece = 0;
        request.number_of_pieces = 1;
        request.ghost_levels = ghost_levels;
        Ok(())
    }

    /// Requests a piece of the whole extent instead of an explicit extent.
    pub fn set_update_piece(
        &mut self,
        node: NodeId,
        port: usize,
        piece: u32,
        number_of_pieces: u32,
        ghost_levels: u32,
    ) -> Result<()> {
        let request = &mut self.port_mut(node, port)?.requested;
        request.extent = None;
        request.piece = piece;
        request.number_of_pieces = number_of_pieces;
        request.ghost_levels = ghost_levels;
        Ok(())
    }

    pub fn set_update_time(&mut self, node: NodeId, port: usize, time: Option<f64>) -> Result<()> {
        self.port_mut(node, port)?.requested.time = time;
        Ok(())
    }

    pub fn set_request_exact_extent(
        &mut self,
        node: NodeId,
        port: usize,
        exact: bool,
    ) -> Result<()> {
        self.port_mut(node, port)?.requested.exact_extent = exact;
        Ok(())
    }

    pub fn set_update_mode(&mut self, node: NodeId, port: usize, mode: CombineMode) -> Result<()> {
        self.port_mut(node, port)?.requested.mode = mode;
        Ok(())
    }

    // Getters

    /// Executive state of an output port.
    pub fn port_state(&self, node: NodeId, port: usize) -> Result<&PortState> {
        self.port(node, port)
    }

    pub fn information(&self, node: NodeId, port: usize) -> Result<&OutputInformation> {
        Ok(&self.port(node, port)?.information)
    }

    pub fn whole_extent(&self, node: NodeId, port: usize) -> Result<Option<Extent>> {
        Ok(self.port(node, port)?.information.whole_extent)
    }

    pub fn update_request(&self, node: NodeId, port: usize) -> Result<&UpdateRequest> {
        Ok(&self.port(node, port)?.requested)
    }

    /// The extent the last update settled on for this port.
    pub fn update_extent(&self, node: NodeId, port: usize) -> Result<Extent> {
        Ok(self.port(node, port)?.update_extent)
    }

    /// The combined update extent; [`Extent::EMPTY`] outside a pass.
    pub fn combined_update_extent(&self, node: NodeId, port: usize) -> Result<Extent> {
        Ok(self.port(node, port)?.combined)
    }

    /// The data published on an output port.
    pub fn output(&self, node: NodeId, port: usize) -> Result<Option<Arc<DataObject>>> {
        Ok(self.port(node, port)?.data.clone())
    }

    // Cache control

    pub fn cache(&self, node: NodeId) -> Result<&ExtentCache> {
        self.node(node)?
            .cache
            .as_ref()
            .ok_or(PipelineError::NotCached(node))
    }

    pub fn set_cache_size(&mut self, node: NodeId, size: usize) -> Result<()> {
        self.node_mut(node)?
            .cache
            .as_mut()
            .ok_or(PipelineError::NotCached(node))?
            .set_cache_size(size);
        Ok(())
    }

    pub fn cache_size(&self, node: NodeId) -> Result<usize> {
        Ok(self.cache(node)?.cache_size())
    }

    /// Registers a callback for execution events of `node`.
    pub fn add_observer<F>(&mut self, node: NodeId, callback: F) -> Result<()>
    where
        F: FnMut(NodeId, &PipelineEvent) + Send + 'static,
    {
        self.node_mut(node)?.observers.push(Box::new(callback));
        Ok(())
    }

    pub fn clear_observers(&mut self, node: NodeId) -> Result<()> {
        self.node_mut(node)?.observers.clear();
        Ok(())
    }

    /// Nodes `node` depends on, itself last, each after its inputs.
    pub(crate) fn upstream_order(&self, node: NodeId) -> Vec<NodeId> {
        let mut visited = vec![false; self.nodes.len()];
        let mut order = Vec::new();
        // (node, children pushed)
        let mut stack = vec![(node, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            if id.0 >= self.nodes.len() || visited[id.0] {
                continue;
            }
            visited[id.0] = true;
            stack.push((id, true));
            for connection in self.nodes[id.0].inputs.iter().flatten().rev() {
                if !visited[connection.node.0] {
                    stack.push((connection.node, false));
                }
            }
        }
        order
    }
}

//! Built-in fragment catalog.
//!
//! Fragments are emitted in declaration order. The target document keeps all
//! `storage.files` entries in one contiguous list followed by all `systemd.units`
//! entries, so every file fragment must sit between the two section headers and
//! every unit fragment after the second one.

use crate::fragment::{Fragment, TagFilter};

const NODE_ROLES: &[&str] = &["quorum", "master", "worker", "border"];

pub static FRAGMENTS: &[Fragment] = &[
    // storage.files
    Fragment {
        name: "storage-header",
        filter: TagFilter::ALWAYS,
        text: "storage:\n  files:\n",
    },
    Fragment {
        name: "hostname",
        filter: TagFilter::ALWAYS,
        text: r#"    - path: /etc/hostname
      filesystem: root
      mode: "0644"
      contents:
        inline: |
          {{ hostname }}
"#,
    },
    Fragment {
        name: "cluster-env",
        filter: TagFilter::ALWAYS,
        text: r#"    - path: /etc/cirrus/cluster.env
      filesystem: root
      mode: "0644"
      contents:
        inline: |
          CIRRUS_CLUSTER_ID={{ cluster_id }}
          CIRRUS_DOMAIN={{ domain }}
          CIRRUS_ROLES={{ roles }}
          CIRRUS_IAAS={{ iaas }}
          CIRRUS_FQDN={{ fqdn }}
          CIRRUS_QUORUM_COUNT={{ quorum_count }}
          CIRRUS_MASTER_COUNT={{ master_count }}
          ETCD_ENDPOINTS={{ etcd_endpoints }}
          ZK_SERVERS={{ zk_servers }}
"#,
    },
    Fragment {
        name: "ec2-env",
        filter: TagFilter::any_of(&["ec2"]),
        text: r#"    - path: /etc/cirrus/ec2.env
      filesystem: root
      mode: "0644"
      contents:
        inline: |
          AWS_REGION={{ region }}
"#,
    },
    Fragment {
        name: "ca-cert",
        filter: TagFilter::ALWAYS.all_of(&["cacert"]),
        text: r#"    - path: /etc/ssl/certs/cirrus-ca.pem
      filesystem: root
      mode: "0644"
      contents:
        inline: |
{{ ca_cert_block }}
"#,
    },
    Fragment {
        name: "zookeeper-config",
        filter: TagFilter::any_of(&["quorum"]),
        text: r#"    - path: /etc/zookeeper/zoo.cfg
      filesystem: root
      mode: "0644"
      contents:
        inline: |
          dataDir=/var/lib/zookeeper
          clientPort=2181
          initLimit=10
          syncLimit=5
{{ zk_ensemble_block }}
"#,
    },
    Fragment {
        name: "mesos-master-env",
        filter: TagFilter::any_of(&["master"]),
        text: r#"    - path: /etc/cirrus/mesos-master.env
      filesystem: root
      mode: "0644"
      contents:
        inline: |
          MESOS_ZK={{ mesos_zk }}
          MESOS_QUORUM={{ master_quorum }}
          MESOS_HOSTNAME={{ fqdn }}
          MESOS_CLUSTER={{ cluster_id }}
"#,
    },
    Fragment {
        name: "mesos-agent-env",
        filter: TagFilter::any_of(&["worker"]),
        text: r#"    - path: /etc/cirrus/mesos-agent.env
      filesystem: root
      mode: "0644"
      contents:
        inline: |
          MESOS_MASTER={{ mesos_zk }}
          MESOS_HOSTNAME={{ fqdn }}
          MESOS_CONTAINERIZERS=docker,mesos
          MESOS_ATTRIBUTES=roles:{{ roles_attr }}
"#,
    },
    Fragment {
        name: "border-sysctl",
        filter: TagFilter::any_of(&["border"]),
        text: r#"    - path: /etc/sysctl.d/90-border.conf
      filesystem: root
      mode: "0644"
      contents:
        inline: |
          net.ipv4.ip_forward=1
"#,
    },
    Fragment {
        name: "prometheus-config",
        filter: TagFilter::any_of(&["master"]).all_of(&["prometheus"]),
        text: r#"    - path: /etc/prometheus/prometheus.yml
      filesystem: root
      mode: "0644"
      contents:
        inline: |
          global:
            scrape_interval: 15s
          scrape_configs:
            - job_name: node
              dns_sd_configs:
                - names: ["node-exporter.{{ domain }}"]
                  type: A
                  port: 9100
"#,
    },
    Fragment {
        name: "alertmanager-config",
        filter: TagFilter::any_of(&["master"]).all_of(&["alertmanager"]),
        text: r#"    - path: /etc/alertmanager/config.yml
      filesystem: root
      mode: "0644"
      contents:
        inline: |
          route:
            receiver: default
          receivers:
            - name: default
"#,
    },
    // systemd.units
    Fragment {
        name: "systemd-header",
        filter: TagFilter::ALWAYS,
        text: "systemd:\n  units:\n",
    },
    Fragment {
        name: "docker",
        filter: TagFilter::ALWAYS,
        text: r#"    - name: docker.service
      enabled: true
"#,
    },
    Fragment {
        name: "ca-trust",
        filter: TagFilter::ALWAYS.all_of(&["cacert"]),
        text: r#"    - name: cirrus-ca-trust.service
      enabled: true
      contents: |
        [Unit]
        Description=Trust the cluster CA certificate
        Before=docker.service
        [Service]
        Type=oneshot
        ExecStart=/usr/sbin/update-ca-certificates
        [Install]
        WantedBy=multi-user.target
"#,
    },
    Fragment {
        name: "etcd-bootstrap-new",
        filter: TagFilter::any_of(&["quorum"]).all_of(&["cluster-state-new"]),
        text: r#"    - name: etcd-member.service
      enabled: true
      dropins:
        - name: 40-cirrus.conf
          contents: |
            [Service]
            Environment="ETCD_NAME={{ hostname }}"
            Environment="ETCD_ADVERTISE_CLIENT_URLS=http://{{ fqdn }}:2379"
            Environment="ETCD_INITIAL_ADVERTISE_PEER_URLS=http://{{ fqdn }}:2380"
            Environment="ETCD_LISTEN_CLIENT_URLS=http://0.0.0.0:2379"
            Environment="ETCD_LISTEN_PEER_URLS=http://0.0.0.0:2380"
            Environment="ETCD_DISCOVERY={{ discovery_url }}"
"#,
    },
    Fragment {
        name: "etcd-bootstrap-existing",
        filter: TagFilter::any_of(&["quorum"]).all_of(&["cluster-state-existing"]),
        text: r#"    - name: etcd-member.service
      enabled: true
      dropins:
        - name: 40-cirrus.conf
          contents: |
            [Service]
            Environment="ETCD_NAME={{ hostname }}"
            Environment="ETCD_ADVERTISE_CLIENT_URLS=http://{{ fqdn }}:2379"
            Environment="ETCD_INITIAL_ADVERTISE_PEER_URLS=http://{{ fqdn }}:2380"
            Environment="ETCD_LISTEN_CLIENT_URLS=http://0.0.0.0:2379"
            Environment="ETCD_LISTEN_PEER_URLS=http://0.0.0.0:2380"
            Environment="ETCD_INITIAL_CLUSTER={{ etcd_initial_cluster }}"
            Environment="ETCD_INITIAL_CLUSTER_STATE=existing"
"#,
    },
    Fragment {
        name: "etcd-proxy",
        filter: TagFilter::any_of(NODE_ROLES).none_of(&["quorum"]),
        text: r#"    - name: etcd-member.service
      enabled: true
      dropins:
        - name: 40-cirrus.conf
          contents: |
            [Service]
            Environment="ETCD_PROXY=on"
            Environment="ETCD_LISTEN_CLIENT_URLS=http://127.0.0.1:2379"
            Environment="ETCD_INITIAL_CLUSTER={{ etcd_initial_cluster }}"
"#,
    },
    Fragment {
        name: "zookeeper",
        filter: TagFilter::any_of(&["quorum"]),
        text: r#"    - name: zookeeper.service
      enabled: true
      contents: |
        [Unit]
        Description=Zookeeper
        After=docker.service
        Requires=docker.service
        [Service]
        Restart=always
        ExecStartPre=-/usr/bin/docker rm -f zookeeper
        ExecStart=/usr/bin/docker run --net host --name zookeeper -v /etc/zookeeper:/conf -v /var/lib/zookeeper:/var/lib/zookeeper -e ZOO_MY_ID={{ host_id }} zookeeper:3.4
        ExecStop=/usr/bin/docker stop zookeeper
        [Install]
        WantedBy=multi-user.target
"#,
    },
    Fragment {
        name: "mesos-master",
        filter: TagFilter::any_of(&["master"]),
        text: r#"    - name: mesos-master.service
      enabled: true
      contents: |
        [Unit]
        Description=Mesos master
        After=docker.service
        Requires=docker.service
        [Service]
        Restart=always
        EnvironmentFile=/etc/cirrus/mesos-master.env
        ExecStartPre=-/usr/bin/docker rm -f mesos-master
        ExecStart=/usr/bin/docker run --net host --name mesos-master --env-file /etc/cirrus/mesos-master.env mesosphere/mesos-master:1.7.1
        ExecStop=/usr/bin/docker stop mesos-master
        [Install]
        WantedBy=multi-user.target
"#,
    },
    Fragment {
        name: "marathon",
        filter: TagFilter::any_of(&["master"]),
        text: r#"    - name: marathon.service
      enabled: true
      contents: |
        [Unit]
        Description=Marathon
        After=mesos-master.service
        Requires=docker.service
        [Service]
        Restart=always
        ExecStartPre=-/usr/bin/docker rm -f marathon
        ExecStart=/usr/bin/docker run --net host --name marathon mesosphere/marathon:v1.8.222 --master {{ mesos_zk }} --zk zk://{{ zk_servers }}/marathon --hostname {{ fqdn }}
        ExecStop=/usr/bin/docker stop marathon
        [Install]
        WantedBy=multi-user.target
"#,
    },
    Fragment {
        name: "mesos-agent",
        filter: TagFilter::any_of(&["worker"]),
        text: r#"    - name: mesos-agent.service
      enabled: true
      contents: |
        [Unit]
        Description=Mesos agent
        After=docker.service
        Requires=docker.service
        [Service]
        Restart=always
        ExecStartPre=-/usr/bin/docker rm -f mesos-agent
        ExecStart=/usr/bin/docker run --net host --pid host --privileged --name mesos-agent --env-file /etc/cirrus/mesos-agent.env -v /var/run/docker.sock:/var/run/docker.sock mesosphere/mesos-slave:1.7.1
        ExecStop=/usr/bin/docker stop mesos-agent
        [Install]
        WantedBy=multi-user.target
"#,
    },
    Fragment {
        name: "marathon-lb",
        filter: TagFilter::any_of(&["border"]),
        text: r#"    - name: marathon-lb.service
      enabled: true
      contents: |
        [Unit]
        Description=Marathon load balancer
        After=docker.service
        Requires=docker.service
        [Service]
        Restart=always
        ExecStartPre=-/usr/bin/docker rm -f marathon-lb
        ExecStart=/usr/bin/docker run --net host --privileged --name marathon-lb mesosphere/marathon-lb:v1.14.1 sse --group external --marathon http://{{ master_endpoint }}:8080
        ExecStop=/usr/bin/docker stop marathon-lb
        [Install]
        WantedBy=multi-user.target
"#,
    },
    Fragment {
        name: "node-exporter",
        filter: TagFilter::any_of(NODE_ROLES).all_of(&["prometheus"]),
        text: r#"    - name: node-exporter.service
      enabled: true
      contents: |
        [Unit]
        Description=Prometheus node exporter
        After=docker.service
        Requires=docker.service
        [Service]
        Restart=always
        ExecStartPre=-/usr/bin/docker rm -f node-exporter
        ExecStart=/usr/bin/docker run --net host --pid host --name node-exporter prom/node-exporter:v0.18.1
        ExecStop=/usr/bin/docker stop node-exporter
        [Install]
        WantedBy=multi-user.target
"#,
    },
    Fragment {
        name: "prometheus",
        filter: TagFilter::any_of(&["master"]).all_of(&["prometheus"]),
        text: r#"    - name: prometheus.service
      enabled: true
      contents: |
        [Unit]
        Description=Prometheus server
        After=docker.service
        Requires=docker.service
        [Service]
        Restart=always
        ExecStartPre=-/usr/bin/docker rm -f prometheus
        ExecStart=/usr/bin/docker run --net host --name prometheus -v /etc/prometheus:/etc/prometheus prom/prometheus:v2.12.0 --web.listen-address=:9191
        ExecStop=/usr/bin/docker stop prometheus
        [Install]
        WantedBy=multi-user.target
"#,
    },
    Fragment {
        name: "alertmanager",
        filter: TagFilter::any_of(&["master"]).all_of(&["alertmanager"]),
        text: r#"    - name: alertmanager.service
      enabled: true
      contents: |
        [Unit]
        Description=Prometheus alertmanager
        After=docker.service
        Requires=docker.service
        [Service]
        Restart=always
        ExecStartPre=-/usr/bin/docker rm -f alertmanager
        ExecStart=/usr/bin/docker run --net host --name alertmanager -v /etc/alertmanager:/etc/alertmanager prom/alertmanager:v0.19.0
        ExecStop=/usr/bin/docker stop alertmanager
        [Install]
        WantedBy=multi-user.target
"#,
    },
    Fragment {
        name: "packet-phone-home",
        filter: TagFilter::any_of(&["packet"]),
        text: r#"    - name: packet-phone-home.service
      enabled: true
"#,
    },
];
